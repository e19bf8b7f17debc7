//! Login session state machine
//!
//! Owns the authenticated client, the mailbox password, and the
//! current user record. The caller drives the machine by inspecting
//! [`LoginState`] after each call: a human-verification challenge
//! surfaces as a state (not an error), with the state to resume once
//! the challenge is solved out-of-band.

use crate::client::{Client, ClientBuilder};
use crate::crypto::KeyUnlocker;
use crate::error::{Error, Result};
use crate::keyring::MailboxPasswordValidator;
use crate::retry::AutoRetryClient;
use crate::types::{Auth2faReq, HvChallenge, PasswordMode, Salts, User};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoginState {
    #[default]
    LoggedOut,
    AwaitingTotp,
    AwaitingMailboxPassword,
    AwaitingHumanVerification {
        challenge: HvChallenge,
        /// State to return to once the challenge is solved.
        previous: Box<LoginState>,
    },
    LoggedIn,
}

pub struct Session<B: ClientBuilder> {
    builder: B,
    unlocker: Arc<dyn KeyUnlocker>,
    client: Option<Arc<AutoRetryClient<B::Client>>>,
    state: LoginState,
    password_mode: PasswordMode,
    mailbox_password: zeroize::Zeroizing<Vec<u8>>,
    user: Option<User>,
    salts: Option<Salts>,
}

impl<B: ClientBuilder> Session<B> {
    pub fn new(builder: B, unlocker: Arc<dyn KeyUnlocker>) -> Self {
        Self {
            builder,
            unlocker,
            client: None,
            state: LoginState::LoggedOut,
            password_mode: PasswordMode::One,
            mailbox_password: zeroize::Zeroizing::new(Vec::new()),
            user: None,
            salts: None,
        }
    }

    #[must_use]
    pub const fn login_state(&self) -> &LoginState {
        &self.state
    }

    pub fn client(&self) -> Result<&Arc<AutoRetryClient<B::Client>>> {
        self.client.as_ref().ok_or(Error::InvalidLoginState)
    }

    pub fn user(&self) -> Result<&User> {
        self.user.as_ref().ok_or(Error::InvalidLoginState)
    }

    pub fn salts(&self) -> Result<&Salts> {
        self.salts.as_ref().ok_or(Error::InvalidLoginState)
    }

    pub fn email(&self) -> Result<&str> {
        self.user().map(|u| u.email.as_str())
    }

    #[must_use]
    pub fn mailbox_password(&self) -> &[u8] {
        &self.mailbox_password
    }

    #[must_use]
    pub fn unlocker(&self) -> &Arc<dyn KeyUnlocker> {
        &self.unlocker
    }

    /// URL where the pending human-verification challenge can be
    /// solved.
    pub fn hv_solve_url(&self) -> Result<&str> {
        match &self.state {
            LoginState::AwaitingHumanVerification { challenge, .. } => {
                Ok(challenge.url.as_str())
            }
            _ => Err(Error::InvalidLoginState),
        }
    }

    /// Authenticate with username and password.
    ///
    /// Allowed from `LoggedOut` and `AwaitingHumanVerification`; in
    /// the latter case the challenge token is passed back to the
    /// service. A new challenge is captured into the state and
    /// reported as success.
    pub async fn login(
        &mut self,
        cancel: &CancellationToken,
        username: &str,
        password: &[u8],
    ) -> Result<()> {
        let hv = match &self.state {
            LoginState::LoggedOut => None,
            LoginState::AwaitingHumanVerification { challenge, .. } => Some(challenge.clone()),
            _ => return Err(Error::InvalidLoginState),
        };

        match self
            .builder
            .new_client(cancel, username, password, hv.as_ref())
            .await
        {
            Ok((client, auth)) => {
                self.client = Some(Arc::new(AutoRetryClient::new(client)));
                self.set_mailbox_password(password);
                self.password_mode = auth.password_mode;

                if auth.totp_enabled {
                    self.state = LoginState::AwaitingTotp;
                    return Ok(());
                }

                self.load_user(cancel, None).await
            }
            Err(Error::HumanVerificationRequested(challenge)) => {
                info!("human verification requested during login");
                self.state = LoginState::AwaitingHumanVerification {
                    challenge,
                    previous: Box::new(LoginState::LoggedOut),
                };
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Submit the second-factor code.
    pub async fn submit_totp(&mut self, cancel: &CancellationToken, code: &str) -> Result<()> {
        if self.state != LoginState::AwaitingTotp {
            return Err(Error::InvalidLoginState);
        }

        let client = Arc::clone(self.client()?);
        match client
            .auth_2fa(
                cancel,
                &Auth2faReq {
                    code: code.to_string(),
                },
            )
            .await
        {
            Ok(()) => self.load_user(cancel, None).await,
            Err(Error::Api { .. }) => Err(Error::TwoFactorFailed),
            Err(err) => Err(err),
        }
    }

    /// Submit the second (mailbox) password.
    ///
    /// The state is left unchanged when the validator rejects the
    /// candidate.
    pub fn submit_mailbox_password(
        &mut self,
        validator: &dyn MailboxPasswordValidator,
        password: &[u8],
    ) -> Result<()> {
        if self.state != LoginState::AwaitingMailboxPassword {
            return Err(Error::InvalidLoginState);
        }

        if !validator.validate(password) {
            return Err(Error::MailboxPasswordRejected);
        }

        self.set_mailbox_password(password);
        self.state = LoginState::LoggedIn;
        Ok(())
    }

    /// Acknowledge that the pending challenge has been solved and
    /// resume the recorded state.
    pub async fn mark_hv_solved(&mut self, cancel: &CancellationToken) -> Result<()> {
        let state = std::mem::take(&mut self.state);
        let LoginState::AwaitingHumanVerification {
            challenge,
            previous,
        } = state
        else {
            self.state = state;
            return Err(Error::InvalidLoginState);
        };

        match *previous {
            target @ (LoginState::LoggedIn | LoginState::AwaitingMailboxPassword)
                if self.user.is_none() =>
            {
                // The challenged call was the user fetch; repeat it
                // with the solved challenge attached.
                match self.fetch_user(cancel, Some(&challenge)).await {
                    Ok(()) => {
                        self.state = target;
                        Ok(())
                    }
                    Err(err) => {
                        self.state = LoginState::AwaitingHumanVerification {
                            challenge,
                            previous: Box::new(target),
                        };
                        Err(err)
                    }
                }
            }
            target => {
                self.state = target;
                Ok(())
            }
        }
    }

    /// Invalidate the authentication and return to `LoggedOut`.
    pub async fn logout(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state == LoginState::LoggedOut {
            return Err(Error::InvalidLoginState);
        }

        if let Some(client) = &self.client {
            client.auth_delete(cancel).await?;
        }

        self.state = LoginState::LoggedOut;
        self.client = None;
        self.user = None;
        self.salts = None;
        self.set_mailbox_password(&[]);

        Ok(())
    }

    /// Best-effort logout and secret cleanup at end of life.
    pub async fn close(&mut self, cancel: &CancellationToken) {
        if self.client.is_some() && self.state != LoginState::LoggedOut {
            if let Err(err) = self.logout(cancel).await {
                error!(error = %err, "failed to log out");
            }
        }
        self.client = None;
        self.set_mailbox_password(&[]);
    }

    /// Fetch user and salts, then settle into the post-auth state.
    ///
    /// The user record is needed before `LoggedIn` and also in
    /// `AwaitingMailboxPassword` (the password validator runs against
    /// it), so it is loaded right after authentication.
    async fn load_user(
        &mut self,
        cancel: &CancellationToken,
        hv: Option<&HvChallenge>,
    ) -> Result<()> {
        let target = if self.password_mode == PasswordMode::Two {
            LoginState::AwaitingMailboxPassword
        } else {
            LoginState::LoggedIn
        };

        match self.fetch_user(cancel, hv).await {
            Ok(()) => {
                self.state = target;
                Ok(())
            }
            Err(Error::HumanVerificationRequested(challenge)) => {
                info!("human verification requested while loading user");
                self.state = LoginState::AwaitingHumanVerification {
                    challenge,
                    previous: Box::new(target),
                };
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn fetch_user(
        &mut self,
        cancel: &CancellationToken,
        hv: Option<&HvChallenge>,
    ) -> Result<()> {
        let client = Arc::clone(self.client()?);
        let user = client.get_user(cancel, hv).await?;
        let salts = client.get_salts(cancel).await?;
        self.user = Some(user);
        self.salts = Some(salts);
        Ok(())
    }

    fn set_mailbox_password(&mut self, password: &[u8]) {
        // Replacing the Zeroizing buffer wipes the previous secret.
        self.mailbox_password = zeroize::Zeroizing::new(password.to_vec());
    }
}
