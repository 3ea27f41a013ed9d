use std::io::{self, BufRead, Write};
use vcsplus_core::IdentityProvider;

/// Identity store backed by the config file. Prompts for a nickname on `input` when the config
/// does not hold an identity yet; the caller writes the identity back to the config afterwards if
/// it changed.
pub struct PromptingIdentityStore<R> {
    identity: Option<String>,
    updated: bool,
    input: R,
}

impl<R: BufRead> PromptingIdentityStore<R> {
    pub fn new(identity: Option<String>, input: R) -> Self {
        Self { identity, updated: false, input }
    }

    /// The identity, if one was generated during this run.
    pub fn updated_identity(&self) -> Option<&str> {
        if self.updated {
            self.identity.as_deref()
        } else {
            None
        }
    }
}

impl<R: BufRead> IdentityProvider for PromptingIdentityStore<R> {
    fn get_identity(&self) -> Option<String> {
        self.identity.clone()
    }

    fn set_identity(&mut self, identity: &str) {
        self.identity = Some(identity.into());
        self.updated = true;
    }

    fn prompt_nickname(&mut self) -> Option<String> {
        eprint!(
            "This ROM uses PlusROM functions. Enter a nickname for the back end requests (max. 10 chars): "
        );
        if let Err(err) = io::stderr().flush() {
            log::warn!("Unable to flush nickname prompt to stderr: {err}");
        }

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().into()),
            Err(err) => {
                log::error!("Unable to read nickname from stdin: {err}");
                None
            }
        }
    }
}
