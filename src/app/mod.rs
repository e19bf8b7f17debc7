//! Interactive CLI front-end
//!
//! Drives the session state machine from flags, environment
//! variables, and interactive prompts, then dispatches to the backup
//! or restore task. The remote transport and the OpenPGP
//! implementation are supplied by the embedding host via
//! [`ClientBuilder`] and [`KeyUnlocker`].

mod credentials;
mod operation;
mod target_folder;

pub use operation::Operation;

use crate::client::ClientBuilder;
use crate::crypto::KeyUnlocker;
use crate::error::{Error, Result};
use crate::export::ExportTask;
use crate::keyring::KeyUnlockValidator;
use crate::reporter::Reporter;
use crate::restore::RestoreTask;
use crate::session::{LoginState, Session};
use clap::Parser;
use credentials::Credentials;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_API_URL: &str = "https://mail-api.example.com";

/// The remote endpoint: `ET_API_URL` or the built-in default.
#[must_use]
pub fn api_url() -> String {
    std::env::var("ET_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string())
}

#[derive(Parser, Debug)]
#[command(name = "mailvault")]
#[command(about = "Backup and restore an encrypted mailbox")]
pub struct Args {
    /// Account email
    #[arg(long, short = 'u', env = "ET_USER_EMAIL")]
    pub username: Option<String>,

    /// Account password
    #[arg(long, short = 'p', env = "ET_USER_PASSWORD")]
    pub password: Option<String>,

    /// Second password (two-password accounts)
    #[arg(long = "mbox-password", short = 'm', env = "ET_USER_MAILBOX_PASSWORD")]
    pub mbox_password: Option<String>,

    /// Second-factor code
    #[arg(long, short = 't', env = "ET_TOTP_CODE")]
    pub totp: Option<String>,

    /// Operation: backup or restore (also b / r)
    #[arg(long, short = 'o', env = "ET_OPERATION")]
    pub operation: Option<String>,

    /// Target directory
    #[arg(long = "dir", short = 'f', env = "ET_DIR")]
    pub dir: Option<String>,
}

/// Parse CLI arguments, reading a `.env` file first if present.
#[must_use]
pub fn parse_args() -> Args {
    dotenvy::dotenv().ok();
    Args::parse()
}

/// Install the default tracing subscriber (filtered by `RUST_LOG`).
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

/// Run the tool end to end: login, pick operation and folder,
/// dispatch.
pub async fn run<B: ClientBuilder>(
    builder: B,
    unlocker: Arc<dyn KeyUnlocker>,
    args: Args,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let mut session = Session::new(builder, unlocker);
    let mut creds = Credentials::from_args(&args);

    let operation = operation::resolve(args.operation.as_deref())?;

    let result = drive(&cancel, &mut session, &mut creds, operation, args.dir.as_deref()).await;

    session.close(&cancel).await;
    result
}

async fn drive<B: ClientBuilder>(
    cancel: &CancellationToken,
    session: &mut Session<B>,
    creds: &mut Credentials,
    operation: Operation,
    dir: Option<&str>,
) -> Result<()> {
    login(cancel, session, creds).await?;

    let dir = target_folder::resolve(dir, operation, session.email()?)?;
    let reporter = ConsoleReporter::default();

    match operation {
        Operation::Backup => {
            let task = ExportTask::new(session, &dir)?;
            println!("Starting backup to {}", task.export_dir().display());
            let result = task.run(&reporter).await;
            task.close();
            if result.is_ok() {
                println!("\nBackup finished");
            }
            result
        }
        Operation::Restore => {
            let mut task = RestoreTask::new(session, &dir)?;
            println!("Starting restore from {}", task.backup_dir().display());
            let result = task.run(&reporter).await;
            if result.is_ok() {
                println!("\nRestore finished");
            }
            println!("Importable emails: {}", task.importable_count());
            println!("Successful imports: {}", task.imported_count());
            println!("Failed imports: {}", task.failed_count());
            println!("Skipped imports: {}", task.skipped_count());
            result
        }
    }
}

/// Drive the login state machine until `LoggedIn`, prompting for
/// anything the flags did not provide.
async fn login<B: ClientBuilder>(
    cancel: &CancellationToken,
    session: &mut Session<B>,
    creds: &mut Credentials,
) -> Result<()> {
    loop {
        // Clone the state so the match body can borrow the session
        // mutably.
        let state = session.login_state().clone();
        match state {
            LoginState::LoggedOut => {
                if creds.username.is_empty() {
                    creds.username = read_line("Enter your username: ")?;
                }
                if creds.password.is_empty() {
                    creds.password = read_password("Enter your password: ")?;
                }
                let (username, password) = (creds.username.clone(), creds.password.clone());
                if let Err(err) = session.login(cancel, &username, &password).await {
                    print_error(&err);
                    creds.next_attempt()?;
                }
            }
            LoginState::AwaitingTotp => {
                if creds.totp.is_empty() {
                    creds.totp = read_line("Enter the code from your authenticator app: ")?;
                }
                let totp = creds.totp.clone();
                if let Err(err) = session.submit_totp(cancel, &totp).await {
                    print_error(&err);
                    creds.next_attempt()?;
                }
            }
            LoginState::AwaitingMailboxPassword => {
                if creds.mbox_password.is_empty() {
                    creds.mbox_password = read_password("Enter your mailbox password: ")?;
                }
                let user = session.user()?.clone();
                let salts = session.salts()?.clone();
                let unlocker = Arc::clone(session.unlocker());
                let validator = KeyUnlockValidator::new(unlocker.as_ref(), &user, &salts);
                let password = creds.mbox_password.clone();
                if let Err(err) = session.submit_mailbox_password(&validator, &password) {
                    print_error(&err);
                    creds.next_attempt()?;
                }
            }
            LoginState::AwaitingHumanVerification { .. } => {
                let url = session.hv_solve_url()?.to_string();
                println!(
                    "Human verification requested. Open the URL below in a browser and press \
                     ENTER once the challenge is solved.\n\n{url}\n"
                );
                read_line("")?;
                session.mark_hv_solved(cancel).await?;
            }
            LoginState::LoggedIn => return Ok(()),
        }
    }
}

fn print_error(err: &Error) {
    println!("{err}");
}

pub(crate) fn read_line(prompt: &str) -> Result<String> {
    if !prompt.is_empty() {
        print!("{prompt}");
        std::io::stdout().flush()?;
    }
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn read_password(prompt: &str) -> Result<zeroize::Zeroizing<Vec<u8>>> {
    let password = rpassword::prompt_password(prompt)?;
    Ok(zeroize::Zeroizing::new(password.into_bytes()))
}

/// Console progress: percentage per batch, totals up front.
#[derive(Default)]
pub struct ConsoleReporter {
    total: AtomicU64,
    processed: AtomicU64,
}

impl Reporter for ConsoleReporter {
    fn set_message_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        println!("Messages to process: {total}");
    }

    fn set_message_processed(&self, processed: u64) {
        self.processed.store(processed, Ordering::SeqCst);
    }

    fn on_progress(&self, delta: usize) {
        let processed = self
            .processed
            .fetch_add(delta as u64, Ordering::SeqCst)
            .saturating_add(delta as u64);
        let total = self.total.load(Ordering::SeqCst);
        if total > 0 {
            let percent = (processed as f64 / total as f64) * 100.0;
            print!("\rProgress: {processed}/{total} ({percent:.1}%)");
            let _ = std::io::stdout().flush();
        }
    }
}
