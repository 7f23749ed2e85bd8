//! Candidate credential lists.
//!
//! A user-supplied list is used verbatim. Without one, each plugin's default
//! usernames are paired with its default passwords, usernames outermost.

use crate::plugin::CrackPlugin;
use astra_common::{AstraError, AstraResult, Credential};
use std::path::Path;

/// Every username paired with every password, in order. `{user}` inside a
/// password expands to the username it is paired with.
pub fn pair<U, P>(usernames: &[U], passwords: &[P]) -> Vec<Credential>
where
    U: AsRef<str>,
    P: AsRef<str>,
{
    let mut out = Vec::with_capacity(usernames.len() * passwords.len());
    for user in usernames {
        let user = user.as_ref();
        for pass in passwords {
            out.push(Credential::new(user, pass.as_ref().replace("{user}", user)));
        }
    }
    out
}

pub fn default_credentials(plugin: &dyn CrackPlugin) -> Vec<Credential> {
    pair(plugin.default_usernames(), plugin.default_passwords())
}

/// Non-empty, non-comment lines of a list file.
fn read_lines(path: &Path) -> AstraResult<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AstraError::config_load(path.display().to_string(), e))?;
    Ok(content
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Build the credential list from optional files.
///
/// - `cred_file`: `user:pass` per line, taken as-is
/// - `user_file` x `pass_file`: paired like the defaults
///
/// Returns an empty list when no file is given, which tells the engine to
/// fall back to plugin defaults.
pub fn load_credentials(
    user_file: Option<&Path>,
    pass_file: Option<&Path>,
    cred_file: Option<&Path>,
) -> AstraResult<Vec<Credential>> {
    let mut creds = Vec::new();

    if let Some(path) = cred_file {
        for line in read_lines(path)? {
            let cred = Credential::parse_pair(&line).ok_or_else(|| {
                AstraError::config_load(
                    path.display().to_string(),
                    format!("expected user:pass, got {line:?}"),
                )
            })?;
            creds.push(cred);
        }
    }

    match (user_file, pass_file) {
        (Some(u), Some(p)) => creds.extend(pair(&read_lines(u)?, &read_lines(p)?)),
        (Some(u), None) => creds.extend(pair(&read_lines(u)?, &[""])),
        (None, Some(p)) => creds.extend(pair(&[""], &read_lines(p)?)),
        (None, None) => {}
    }

    Ok(creds)
}
