//! POSIX shell quoting.

/// Quote `value` for a POSIX shell, leaving simple words bare.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Quote and join a list of words.
pub fn shell_join<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|w| shell_quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_words_stay_bare() {
        assert_eq!(shell_quote("sub-01"), "sub-01");
        assert_eq!(shell_quote("/data/derivatives/segment"), "/data/derivatives/segment");
    }

    #[test]
    fn spaces_and_quotes_are_escaped() {
        assert_eq!(shell_quote("my study"), "'my study'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn joins_words() {
        assert_eq!(shell_join(&["check", "--step", "a b"]), "check --step 'a b'");
    }
}
