use crate::payments::types::CallbackParams;
use crate::payments::utils::secure_eq;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacAlgorithm {
    Sha256,
    Sha512,
}

/// Lowercase hex HMAC of `message` keyed by `secret`.
pub fn hmac_hex(algorithm: HmacAlgorithm, secret: &str, message: &str) -> String {
    match algorithm {
        HmacAlgorithm::Sha256 => {
            // HMAC accepts keys of any length, so construction cannot fail.
            let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
                Ok(mac) => mac,
                Err(_) => return String::new(),
            };
            mac.update(message.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        HmacAlgorithm::Sha512 => {
            let mut mac = match Hmac::<Sha512>::new_from_slice(secret.as_bytes()) {
                Ok(mac) => mac,
                Err(_) => return String::new(),
            };
            mac.update(message.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
    }
}

/// Turns a parameter set into the exact byte string a gateway signs.
pub trait SignatureCodec: Send + Sync {
    fn signature_field(&self) -> &str;

    fn algorithm(&self) -> HmacAlgorithm;

    fn canonicalize(&self, params: &CallbackParams) -> String;

    fn sign(&self, canonical: &str, secret: &str) -> String {
        hmac_hex(self.algorithm(), secret, canonical)
    }

    /// Recomputes over the canonical form and compares in constant time.
    fn verify(&self, params: &CallbackParams, provided: &str, secret: &str) -> bool {
        let provided = provided.trim().to_ascii_lowercase();
        if provided.is_empty() {
            return false;
        }
        let expected = self.sign(&self.canonicalize(params), secret);
        !expected.is_empty() && secure_eq(expected.as_bytes(), provided.as_bytes())
    }

    /// Verifies using the signature carried inside `params` itself.
    fn verify_embedded(&self, params: &CallbackParams, secret: &str) -> bool {
        match params.get(self.signature_field()) {
            Some(provided) => self.verify(params, provided, secret),
            None => false,
        }
    }
}

/// Keys sorted ascending, `key=value` joined by `&`, values left unencoded.
/// Empty values, the signature field and any extra excluded keys are skipped.
#[derive(Debug, Clone)]
pub struct SortedKeyCodec {
    algorithm: HmacAlgorithm,
    signature_field: &'static str,
    excluded: &'static [&'static str],
}

impl SortedKeyCodec {
    pub const fn new(
        algorithm: HmacAlgorithm,
        signature_field: &'static str,
        excluded: &'static [&'static str],
    ) -> Self {
        Self {
            algorithm,
            signature_field,
            excluded,
        }
    }
}

impl SignatureCodec for SortedKeyCodec {
    fn signature_field(&self) -> &str {
        self.signature_field
    }

    fn algorithm(&self) -> HmacAlgorithm {
        self.algorithm
    }

    fn canonicalize(&self, params: &CallbackParams) -> String {
        // BTreeMap iteration is already ascending by key.
        params
            .iter()
            .filter(|(key, value)| {
                key.as_str() != self.signature_field
                    && !self.excluded.contains(&key.as_str())
                    && !value.is_empty()
            })
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// A hardcoded, ordered field list. Fields outside the list are ignored and
/// a listed field that is absent is rendered as `key=`.
#[derive(Debug, Clone)]
pub struct FixedFieldCodec {
    algorithm: HmacAlgorithm,
    signature_field: &'static str,
    fields: &'static [&'static str],
}

impl FixedFieldCodec {
    pub const fn new(
        algorithm: HmacAlgorithm,
        signature_field: &'static str,
        fields: &'static [&'static str],
    ) -> Self {
        Self {
            algorithm,
            signature_field,
            fields,
        }
    }

    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }
}

impl SignatureCodec for FixedFieldCodec {
    fn signature_field(&self) -> &str {
        self.signature_field
    }

    fn algorithm(&self) -> HmacAlgorithm {
        self.algorithm
    }

    fn canonicalize(&self, params: &CallbackParams) -> String {
        self.fields
            .iter()
            .filter(|field| **field != self.signature_field)
            .map(|field| {
                format!(
                    "{}={}",
                    field,
                    params.get(*field).map(String::as_str).unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SORTED: SortedKeyCodec =
        SortedKeyCodec::new(HmacAlgorithm::Sha512, "vnp_SecureHash", &["vnp_SecureHashType"]);
    const FIXED: FixedFieldCodec =
        FixedFieldCodec::new(HmacAlgorithm::Sha256, "signature", &["b", "a", "c"]);

    fn params(pairs: &[(&str, &str)]) -> CallbackParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn hmac_matches_rfc4231_vectors() {
        let message = "what do ya want for nothing?";
        assert_eq!(
            hmac_hex(HmacAlgorithm::Sha256, "Jefe", message),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert_eq!(
            hmac_hex(HmacAlgorithm::Sha512, "Jefe", message),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea2505549758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn sorted_key_canonicalization_orders_and_skips_signature_fields() {
        let p = params(&[
            ("vnp_TxnRef", "ORD-1"),
            ("vnp_Amount", "1000000"),
            ("vnp_SecureHash", "abc"),
            ("vnp_SecureHashType", "HmacSHA512"),
            ("vnp_BankCode", ""),
        ]);
        assert_eq!(SORTED.canonicalize(&p), "vnp_Amount=1000000&vnp_TxnRef=ORD-1");
    }

    #[test]
    fn sorted_key_values_are_not_url_encoded_while_signing() {
        let p = params(&[("vnp_OrderInfo", "Thanh toan don hang ORD-1"), ("a", "x&y")]);
        assert_eq!(
            SORTED.canonicalize(&p),
            "a=x&y&vnp_OrderInfo=Thanh toan don hang ORD-1"
        );
    }

    #[test]
    fn fixed_field_canonicalization_follows_list_order() {
        let p = params(&[("a", "1"), ("c", "3"), ("b", "2"), ("z", "ignored"), ("signature", "s")]);
        assert_eq!(FIXED.canonicalize(&p), "b=2&a=1&c=3");
    }

    #[test]
    fn fixed_field_missing_values_render_empty() {
        let p = params(&[("a", "1")]);
        assert_eq!(FIXED.canonicalize(&p), "b=&a=1&c=");
    }

    #[test]
    fn signature_round_trips_for_both_families() {
        let mut p = params(&[("a", "1"), ("b", "2"), ("c", "hello world")]);
        let sig = SORTED.sign(&SORTED.canonicalize(&p), "secret");
        assert!(SORTED.verify(&p, &sig, "secret"));

        let sig = FIXED.sign(&FIXED.canonicalize(&p), "secret");
        p.insert("signature".to_string(), sig.clone());
        assert!(FIXED.verify(&p, &sig, "secret"));
        assert!(FIXED.verify_embedded(&p, "secret"));
    }

    #[test]
    fn tampering_with_any_signed_field_fails_verification() {
        let p = params(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let sig = SORTED.sign(&SORTED.canonicalize(&p), "secret");
        for key in ["a", "b", "c"] {
            let mut tampered = p.clone();
            tampered.insert(key.to_string(), "9".to_string());
            assert!(!SORTED.verify(&tampered, &sig, "secret"), "field {key}");
        }
        assert!(!SORTED.verify(&p, &sig, "other-secret"));
    }

    #[test]
    fn uppercase_signatures_are_accepted() {
        let p = params(&[("a", "1")]);
        let sig = SORTED.sign(&SORTED.canonicalize(&p), "secret").to_uppercase();
        assert!(SORTED.verify(&p, &sig, "secret"));
    }

    #[test]
    fn empty_signature_never_verifies() {
        let p = params(&[("a", "1")]);
        assert!(!SORTED.verify(&p, "", "secret"));
        assert!(!FIXED.verify_embedded(&p, "secret"));
    }
}
