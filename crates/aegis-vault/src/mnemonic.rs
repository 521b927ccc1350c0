//! BIP-39 phrase generation and validation (English wordlist).
//!
//! Wordlist lookup and checksum verification are delegated to the `bip39`
//! crate; this module only adds the vault's own rule that a genesis phrase
//! is exactly twelve words.

use bip39::{Language, Mnemonic};
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::{Result, VaultError};

/// Number of words in a genesis phrase.
pub const WORD_COUNT: usize = 12;

/// Entropy for a twelve-word phrase (128 bits).
const ENTROPY_LEN: usize = 16;

/// Generate a fresh, checksum-valid twelve-word phrase.
pub fn generate() -> Result<Zeroizing<String>> {
    let entropy = crypto::random_bytes(ENTROPY_LEN)?;
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|_| VaultError::storage("failed to derive mnemonic from entropy"))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Validate `phrase` and return its canonical single-space form.
///
/// # Errors
///
/// [`VaultError::Validation`] if the phrase is empty, does not have exactly
/// twelve words, or fails the BIP-39 wordlist/checksum check.  The message
/// never echoes the input.
pub fn normalize(phrase: &str) -> Result<Zeroizing<String>> {
    if phrase.trim().is_empty() {
        return Err(VaultError::validation("mnemonic cannot be empty"));
    }

    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.len() != WORD_COUNT {
        return Err(VaultError::validation(format!(
            "mnemonic must be exactly {WORD_COUNT} words"
        )));
    }

    let canonical = Zeroizing::new(words.join(" "));
    Mnemonic::parse_in_normalized(Language::English, &canonical).map_err(|_| {
        VaultError::validation("invalid mnemonic phrase; words must be from the BIP-39 wordlist")
    })?;

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn generated_phrase_is_valid() {
        let phrase = generate().unwrap();
        assert_eq!(phrase.split(' ').count(), WORD_COUNT);
        assert_eq!(normalize(&phrase).unwrap().as_str(), phrase.as_str());
    }

    #[test]
    fn generated_phrases_differ() {
        assert_ne!(generate().unwrap().as_str(), generate().unwrap().as_str());
    }

    #[test]
    fn whitespace_is_canonicalized() {
        let messy = format!("  {}\t\n", VALID.replace(' ', "   "));
        assert_eq!(normalize(&messy).unwrap().as_str(), VALID);
    }

    #[test]
    fn empty_rejected() {
        assert!(matches!(normalize("   "), Err(VaultError::Validation { .. })));
    }

    #[test]
    fn wrong_word_count_rejected() {
        let eleven = VALID.rsplit_once(' ').unwrap().0;
        assert!(matches!(normalize(eleven), Err(VaultError::Validation { .. })));

        let twenty_four = format!("{VALID} {VALID}");
        assert!(matches!(
            normalize(&twenty_four),
            Err(VaultError::Validation { .. })
        ));
    }

    #[test]
    fn bad_checksum_rejected() {
        let bad = VALID.replace("about", "abandon");
        let err = normalize(&bad).unwrap_err();
        assert!(matches!(err, VaultError::Validation { .. }));
        assert!(!err.to_string().contains("abandon"));
    }

    #[test]
    fn unknown_word_rejected() {
        let bad = VALID.replace("about", "zzzzzz");
        assert!(matches!(normalize(&bad), Err(VaultError::Validation { .. })));
    }
}
