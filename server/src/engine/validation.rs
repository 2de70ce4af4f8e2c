/// Default maximum message content length (characters).
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Maximum server name length.
pub const MAX_SERVER_NAME_LENGTH: usize = 100;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 100;

/// Maximum user display name length.
pub const MAX_USER_NAME_LENGTH: usize = 64;

/// Maximum email address length.
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Emote name length bounds.
pub const MIN_EMOTE_NAME_LENGTH: usize = 2;
pub const MAX_EMOTE_NAME_LENGTH: usize = 32;

fn validate_label(kind: &str, value: &str, max: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{kind} cannot be empty"));
    }
    if value.chars().count() > max {
        return Err(format!("{kind} too long (max {max} characters)"));
    }
    Ok(())
}

/// Validate a server name. Must be 1-100 chars and not blank.
pub fn validate_server_name(name: &str) -> Result<(), String> {
    validate_label("Server name", name, MAX_SERVER_NAME_LENGTH)
}

/// Validate a channel name. Must be 1-100 chars and not blank.
pub fn validate_channel_name(name: &str) -> Result<(), String> {
    validate_label("Channel name", name, MAX_CHANNEL_NAME_LENGTH)
}

/// Validate a user's display name.
pub fn validate_user_name(name: &str) -> Result<(), String> {
    validate_label("Name", name, MAX_USER_NAME_LENGTH)
}

/// Validate message content against the configured length limit.
pub fn validate_message(content: &str, max_length: usize) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Message cannot be empty".into());
    }
    if content.chars().count() > max_length {
        return Err(format!("Message too long (max {max_length} characters)"));
    }
    Ok(())
}

/// Loose shape check: exactly one `@`, a non-empty local part, and a dotted
/// domain without whitespace.
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.len() > MAX_EMAIL_LENGTH {
        return Err("Email too long".into());
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Invalid email address".into());
    };
    let domain_ok = domain
        .split_once('.')
        .is_some_and(|(head, tail)| !head.is_empty() && !tail.is_empty() && !tail.ends_with('.'));
    if local.is_empty()
        || domain.contains('@')
        || !domain_ok
        || email.chars().any(char::is_whitespace)
    {
        return Err("Invalid email address".into());
    }
    Ok(())
}

/// Validate an image URL: `http(s)://`, an optional `www.`, a dotted host
/// ending in an alphabetic TLD, then a path starting with `/`.
pub fn validate_image_url(url: &str) -> Result<(), String> {
    const INVALID: &str = "Invalid image URL";

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| INVALID.to_string())?;
    let (host, _path) = rest.split_once('/').ok_or_else(|| INVALID.to_string())?;

    if !host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
        return Err(INVALID.into());
    }
    let (name, tld) = host.rsplit_once('.').ok_or_else(|| INVALID.to_string())?;
    let name = name.strip_prefix("www.").unwrap_or(name);
    if name.is_empty() || tld.is_empty() || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(INVALID.into());
    }
    Ok(())
}

/// Validate an emote name. Must be 2-32 chars, alphanumeric + underscore.
pub fn validate_emote_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if len < MIN_EMOTE_NAME_LENGTH {
        return Err("Emote name too short".into());
    }
    if len > MAX_EMOTE_NAME_LENGTH {
        return Err(format!(
            "Emote name too long (max {MAX_EMOTE_NAME_LENGTH} characters)"
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("Emote name can only contain letters, numbers, and underscores".into());
    }
    Ok(())
}
