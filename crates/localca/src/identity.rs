/// `user@hostname`, followed by ` (Full Name)` when the account has a distinct
/// display name. Any part that can't be resolved is left out.
pub(crate) fn user_and_hostname() -> String {
    let account = current_account();
    let mut rendered = String::new();
    if let Some(account) = &account {
        rendered.push_str(&account.login);
        rendered.push('@');
    }
    if let Ok(host) = hostname::get() {
        rendered.push_str(&host.to_string_lossy());
    }
    if let Some(full_name) = account.and_then(|account| account.full_name) {
        rendered.push_str(&format!(" ({full_name})"));
    }
    rendered
}

#[derive(Debug)]
struct Account {
    login: String,
    full_name: Option<String>,
}

#[cfg(unix)]
fn current_account() -> Option<Account> {
    let user = nix::unistd::User::from_uid(nix::unistd::geteuid()).ok()??;
    let gecos = user.gecos.to_string_lossy();
    let full_name = gecos
        .split(',')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != user.name)
        .map(str::to_string);
    Some(Account {
        login: user.name,
        full_name,
    })
}

#[cfg(not(unix))]
fn current_account() -> Option<Account> {
    let login = std::env::var("USERNAME").ok().filter(|name| !name.is_empty())?;
    Some(Account {
        login,
        full_name: None,
    })
}

#[cfg(test)]
mod tests {
    use super::user_and_hostname;

    #[test]
    fn owner_string_is_stable_within_process() {
        assert_eq!(user_and_hostname(), user_and_hostname());
    }
}
