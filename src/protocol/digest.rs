// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP-Digest authentication (RFC 2617), hand-rolled: the retrieval pack
//! has no ecosystem digest-auth crate, so this builds the challenge/response
//! on top of `md5` the way ONVIF device services and the Amcrest/Dahua CGI
//! surface both require.

use rand::Rng;

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
}

impl DigestChallenge {
    /// Parse the value of a `WWW-Authenticate` header. Returns `None` if it
    /// is not a `Digest` challenge or is missing `realm`/`nonce`.
    pub fn parse(header_value: &str) -> Option<Self> {
        let rest = header_value.trim().strip_prefix("Digest")?.trim();
        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;

        for part in split_header_params(rest) {
            let (key, value) = part.split_once('=')?;
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop = Some(value),
                "opaque" => opaque = Some(value),
                _ => {}
            }
        }

        Some(Self { realm: realm?, nonce: nonce?, qop, opaque })
    }
}

/// Splits `a="b", c="d,e", f=g` on top-level commas, respecting quotes.
fn split_header_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Build the `Authorization: Digest ...` header value for one request.
/// `nc` is the (caller-tracked) nonce-count for this `nonce`, starting at 1.
pub fn authorization_header(
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    challenge: &DigestChallenge,
    nc: u32,
) -> String {
    let cnonce = random_cnonce();
    let ha1 = md5_hex(&format!("{username}:{}:{password}", challenge.realm));
    let ha2 = md5_hex(&format!("{method}:{uri}"));

    let (response, qop_part) = match &challenge.qop {
        Some(qop) => {
            let qop = qop.split(',').next().unwrap_or("auth").trim();
            let nc_str = format!("{nc:08x}");
            let response = md5_hex(&format!(
                "{ha1}:{}:{nc_str}:{cnonce}:{qop}:{ha2}",
                challenge.nonce
            ));
            (response, format!(", qop={qop}, nc={nc_str}, cnonce=\"{cnonce}\""))
        }
        None => {
            let response = md5_hex(&format!("{ha1}:{}:{ha2}", challenge.nonce));
            (response, String::new())
        }
    };

    let opaque_part = challenge
        .opaque
        .as_ref()
        .map(|o| format!(", opaque=\"{o}\""))
        .unwrap_or_default();

    format!(
        "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", response=\"{response}\"{qop_part}{opaque_part}",
        challenge.realm, challenge.nonce,
    )
}

fn random_cnonce() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 8] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digest_challenge_with_qop() {
        let header = r#"Digest realm="IP Camera", nonce="abc123", qop="auth", opaque="xyz""#;
        let c = DigestChallenge::parse(header).unwrap();
        assert_eq!(c.realm, "IP Camera");
        assert_eq!(c.nonce, "abc123");
        assert_eq!(c.qop.as_deref(), Some("auth"));
        assert_eq!(c.opaque.as_deref(), Some("xyz"));
    }

    #[test]
    fn rejects_non_digest_header() {
        assert!(DigestChallenge::parse("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn authorization_header_contains_expected_fields() {
        let challenge = DigestChallenge {
            realm: "IP Camera".into(),
            nonce: "abc123".into(),
            qop: Some("auth".into()),
            opaque: None,
        };
        let header = authorization_header("admin", "secret", "GET", "/cgi-bin/snapshot.cgi", &challenge, 1);
        assert!(header.starts_with("Digest username=\"admin\""));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("qop=auth"));
    }
}
