use base64::{Engine as _, engine::general_purpose::STANDARD};
use rama::error::OpaqueError;

use super::GREETING_SIZE;

const LINE_SIZE: usize = GREETING_SIZE / 2;

/// Greeting sent by the server on every new connection:
/// two 64 byte lines, the version banner and the base64 encoded auth salt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub version: String,
    pub salt: Vec<u8>,
}

impl Greeting {
    pub fn parse(buf: &[u8; GREETING_SIZE]) -> Result<Self, OpaqueError> {
        let (version_line, salt_line) = buf.split_at(LINE_SIZE);

        let version = trim_line(version_line)?;
        if !version.starts_with("Tarantool") {
            return Err(OpaqueError::from_display(format!(
                "unexpected greeting banner: {version:?}"
            )));
        }

        let salt = STANDARD
            .decode(trim_line(salt_line)?)
            .map_err(|err| OpaqueError::from_display(format!("invalid greeting salt: {err}")))?;

        Ok(Self {
            version: version.to_owned(),
            salt,
        })
    }

    /// Encodes a greeting the way a Tarantool server pads it:
    /// each line filled up with spaces and terminated by a newline.
    pub fn encode(version: &str, salt: &[u8]) -> [u8; GREETING_SIZE] {
        let mut buf = [b' '; GREETING_SIZE];

        let encoded_salt = STANDARD.encode(salt);
        for (line, text) in buf
            .chunks_mut(LINE_SIZE)
            .zip([version.as_bytes(), encoded_salt.as_bytes()])
        {
            let n = text.len().min(LINE_SIZE - 1);
            line[..n].copy_from_slice(&text[..n]);
            line[LINE_SIZE - 1] = b'\n';
        }

        buf
    }
}

fn trim_line(line: &[u8]) -> Result<&str, OpaqueError> {
    std::str::from_utf8(line)
        .map(|s| s.trim_end_matches(|c: char| c.is_whitespace() || c == '\0'))
        .map_err(|err| OpaqueError::from_display(format!("greeting is not utf-8: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_greeting() {
        let mut buf = [b' '; GREETING_SIZE];
        let version = b"Tarantool 2.11.2 (Binary) 7f4e4d37-1fd4-4d5a-9cdb-c4a5b0a1e2f3";
        buf[..version.len()].copy_from_slice(version);
        buf[63] = b'\n';
        let salt = b"AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";
        buf[64..64 + salt.len()].copy_from_slice(salt);
        buf[127] = b'\n';

        let greeting = Greeting::parse(&buf).unwrap();
        assert_eq!(
            greeting.version,
            "Tarantool 2.11.2 (Binary) 7f4e4d37-1fd4-4d5a-9cdb-c4a5b0a1e2f3"
        );
        assert_eq!(greeting.salt, (0u8..32).collect::<Vec<_>>());
    }

    #[test]
    fn encode_then_parse() {
        let salt: Vec<u8> = (100u8..132).collect();
        let buf = Greeting::encode("Tarantool 2.11.0 (Binary) mock", &salt);

        assert_eq!(buf[63], b'\n');
        assert_eq!(buf[127], b'\n');

        let greeting = Greeting::parse(&buf).unwrap();
        assert_eq!(greeting.version, "Tarantool 2.11.0 (Binary) mock");
        assert_eq!(greeting.salt, salt);
    }

    #[test]
    fn rejects_foreign_banner() {
        let buf = Greeting::encode("SSH-2.0-OpenSSH_9.6", b"salt");
        assert!(Greeting::parse(&buf).is_err());
    }

    #[test]
    fn rejects_invalid_salt() {
        let mut buf = Greeting::encode("Tarantool 2.11.0 (Binary)", b"");
        buf[64..68].copy_from_slice(b"!!!!");
        assert!(Greeting::parse(&buf).is_err());
    }
}
