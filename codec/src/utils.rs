// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::error::DecodeError;

/// Generate a random alphanumeric client identifier of `len` characters.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng().sample_iter(&Alphanumeric).map(char::from).take(len).collect()
}

/// Validate a decoded MQTT UTF-8 string (RFC 3629 well-formedness
/// plus the MQTT-specific ban on U+0000 and the C0/C1 control ranges).
///
/// `std::str::from_utf8` already rejects overlong forms and surrogate halves
/// (Rust's `char` cannot represent them), so it does the RFC 3629 half of the
/// work; this function adds the MQTT-only restrictions on top.
pub fn validate_utf8_string(bytes: &[u8]) -> Result<&str, DecodeError> {
    let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8String)?;
    for c in s.chars() {
        let cp = c as u32;
        if cp == 0x0000
            || (0x0001..=0x001F).contains(&cp)
            || (0x007F..=0x009F).contains(&cp)
        {
            return Err(DecodeError::InvalidUtf8String);
        }
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nul_and_control_chars() {
        assert!(validate_utf8_string(b"\x00").is_err());
        assert!(validate_utf8_string(b"\x01").is_err());
        assert!(validate_utf8_string(b"a\x1fb").is_err());
        assert!(validate_utf8_string(b"a\x7fb").is_err());
        assert!(validate_utf8_string(&[0x61, 0xc2, 0x80, 0x62]).is_err());
    }

    #[test]
    fn rejects_overlong_and_surrogate_encodings() {
        // Overlong encoding of NUL: C0 80.
        assert!(validate_utf8_string(&[0xC0, 0x80]).is_err());
        // Encoded surrogate half U+D800: ED A0 80.
        assert!(validate_utf8_string(&[0xED, 0xA0, 0x80]).is_err());
        assert!(validate_utf8_string(&[0xED, 0xBF, 0xBF]).is_err());
    }

    #[test]
    fn accepts_plain_strings() {
        assert_eq!(validate_utf8_string(b" ").unwrap(), " ");
        assert_eq!(validate_utf8_string(b"~").unwrap(), "~");
        assert_eq!(validate_utf8_string("topic1".as_bytes()).unwrap(), "topic1");
    }
}
