//! POSIX shell quoting for remote command lines

/// Quote `word` so `sh` treats it as a single literal argument
#[must_use]
pub fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:@,+%".contains(&b));
    if safe {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Quote a remote path, leaving a leading `~/` for the remote shell to expand
#[must_use]
pub fn quote_path(path: &str) -> String {
    if path == "~" {
        return path.to_string();
    }
    match path.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "~/".to_string(),
        Some(rest) => format!("~/{}", quote(rest)),
        None => quote(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words_untouched() {
        assert_eq!(quote("/srv/imageserver"), "/srv/imageserver");
        assert_eq!(quote("config.xml"), "config.xml");
    }

    #[test]
    fn test_special_characters_quoted() {
        assert_eq!(quote(""), "''");
        assert_eq!(quote("my file"), "'my file'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_home_prefix_kept_unquoted() {
        assert_eq!(quote_path("~/pisc"), "~/pisc");
        assert_eq!(quote_path("~/my app"), "~/'my app'");
        assert_eq!(quote_path("~"), "~");
        assert_eq!(quote_path("/srv/a b"), "'/srv/a b'");
    }
}
