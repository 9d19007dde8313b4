//! 出站签名
//! `X-Webhook-Signature: sha256=<hex(HMAC-SHA256(secret, body))>`

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// 对原始 body 字节签名
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// 校验签名头，常量时间比较
pub fn verify(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(encoded) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(encoded) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let signature = sign("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            signature,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify() {
        let body = br#"{"id":"c1"}"#;
        let signature = sign("whsec_one", body);

        assert!(verify("whsec_one", body, &signature));
        assert!(!verify("whsec_two", body, &signature));
        assert!(!verify("whsec_one", br#"{"id":"c2"}"#, &signature));
        assert!(!verify("whsec_one", body, signature.trim_start_matches(SIGNATURE_PREFIX)));
        assert!(!verify("whsec_one", body, "sha256=zz"));
    }
}
