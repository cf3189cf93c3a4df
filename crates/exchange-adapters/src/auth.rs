use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Binance/Bybit/OKX/Bitget/Huobi: HMAC-SHA256 over a canonicalized query
/// string or request body, hex-encoded.
pub fn sign_hmac_sha256_hex(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// OKX: HMAC-SHA256 signature, base64-encoded rather than hex.
pub fn sign_hmac_sha256_base64(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Kraken's futures API: the secret itself is base64-encoded, the signed
/// message is `body + nonce + endpoint_path` hashed with SHA512, and the
/// resulting digest is base64-encoded. Distinct from every other adapter.
pub fn sign_kraken(b64_secret: &str, endpoint_path: &str, nonce: &str, body: &str) -> Result<String, String> {
    let secret_bytes = base64::engine::general_purpose::STANDARD
        .decode(b64_secret)
        .map_err(|e| format!("invalid Kraken secret (not base64): {e}"))?;

    let message = format!("{body}{nonce}{endpoint_path}");

    let mut mac = HmacSha512::new_from_slice(&secret_bytes).map_err(|e| e.to_string())?;
    mac.update(message.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_signature_is_deterministic() {
        let a = sign_hmac_sha256_hex("secret", "symbol=BTCUSDT&timestamp=1");
        let b = sign_hmac_sha256_hex("secret", "symbol=BTCUSDT&timestamp=1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn kraken_signature_rejects_non_base64_secret() {
        assert!(sign_kraken("not-base64!!", "/api/v3/sendorder", "123", "").is_err());
    }

    #[test]
    fn kraken_signature_is_deterministic() {
        let secret = base64::engine::general_purpose::STANDARD.encode(b"0123456789abcdef0123456789abcdef");
        let a = sign_kraken(&secret, "/api/v3/sendorder", "123", "orderType=mkt").unwrap();
        let b = sign_kraken(&secret, "/api/v3/sendorder", "123", "orderType=mkt").unwrap();
        assert_eq!(a, b);
    }
}
