//! Login credentials gathered from flags, environment, and prompts.

use super::Args;
use crate::error::{Error, Result};
use zeroize::Zeroizing;

const MAX_LOGIN_ATTEMPTS: u32 = 5;

pub(crate) struct Credentials {
    pub(crate) username: String,
    pub(crate) password: Zeroizing<Vec<u8>>,
    pub(crate) totp: String,
    pub(crate) mbox_password: Zeroizing<Vec<u8>>,
    attempt_count: u32,
}

impl Credentials {
    pub(crate) fn from_args(args: &Args) -> Self {
        Self {
            username: args.username.clone().unwrap_or_default(),
            password: Zeroizing::new(
                args.password.clone().unwrap_or_default().into_bytes(),
            ),
            totp: args.totp.clone().unwrap_or_default(),
            mbox_password: Zeroizing::new(
                args.mbox_password.clone().unwrap_or_default().into_bytes(),
            ),
            attempt_count: 0,
        }
    }

    /// Clear everything so the user is re-prompted; give up after the
    /// fifth failed attempt.
    pub(crate) fn next_attempt(&mut self) -> Result<()> {
        self.attempt_count += 1;
        if self.attempt_count >= MAX_LOGIN_ATTEMPTS {
            return Err(Error::Config(
                "failed to login: too many attempts".to_string(),
            ));
        }

        self.username.clear();
        self.password = Zeroizing::new(Vec::new());
        self.totp.clear();
        self.mbox_password = Zeroizing::new(Vec::new());

        Ok(())
    }
}
