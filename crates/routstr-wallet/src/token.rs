//! Cashu token parsing.
//!
//! Only enough structure to read what the Wallet Gateway needs to route a
//! deposit (mint, unit, total amount) — the blind-signature cryptography
//! that actually verifies and redeems proofs lives behind
//! [`crate::backend::CashuWalletBackend`], not here. V3 tokens are base64
//! JSON (`cashuA...`); V4 tokens are base64 CBOR (`cashuB...`). Decoding is
//! hand-rolled rather than pulled in via the `base64` crate, since this is
//! the only place in the workspace that needs it and the alphabet is a
//! dozen lines.

use serde::Deserialize;
use thiserror::Error;

/// Failure to parse a cashu token string.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unrecognized `cashuA`/`cashuB` prefix.
    #[error("not a cashu token")]
    BadPrefix,
    /// The base64 payload was malformed.
    #[error("invalid base64 payload")]
    BadBase64,
    /// The decoded JSON (V3) or CBOR (V4) payload didn't match the expected
    /// token shape.
    #[error("malformed token payload: {0}")]
    BadPayload(String),
    /// A V3/V4 token named more than one mint, which this gateway can't
    /// redeem in a single operation.
    #[error("token spans multiple mints")]
    MultipleMints,
}

/// A parsed token, reduced to what routing a deposit requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    /// the mint this token's proofs were issued by
    pub mint_url: String,
    /// currency unit, e.g. `"sat"`
    pub unit: String,
    /// sum of proof amounts, in `unit`
    pub amount: u64,
}

/// Parse either a V3 (`cashuA...`) or V4 (`cashuB...`) token string.
pub fn parse(token: &str) -> Result<ParsedToken, Error> {
    let token = token.trim();
    if let Some(payload) = token.strip_prefix("cashuA") {
        parse_v3(payload)
    } else if let Some(payload) = token.strip_prefix("cashuB") {
        parse_v4(payload)
    } else {
        Err(Error::BadPrefix)
    }
}

#[derive(Deserialize)]
struct TokenV3 {
    token: Vec<MintEntryV3>,
    #[serde(default = "default_unit")]
    unit: String,
}

#[derive(Deserialize)]
struct MintEntryV3 {
    mint: String,
    proofs: Vec<ProofV3>,
}

#[derive(Deserialize)]
struct ProofV3 {
    amount: u64,
}

fn default_unit() -> String {
    "sat".to_string()
}

fn parse_v3(payload: &str) -> Result<ParsedToken, Error> {
    let bytes = base64_decode(payload)?;
    let parsed: TokenV3 =
        serde_json::from_slice(&bytes).map_err(|e| Error::BadPayload(e.to_string()))?;
    if parsed.token.len() != 1 {
        return Err(Error::MultipleMints);
    }
    let entry = &parsed.token[0];
    let amount = entry.proofs.iter().map(|p| p.amount).sum();
    Ok(ParsedToken {
        mint_url: entry.mint.clone(),
        unit: parsed.unit,
        amount,
    })
}

fn parse_v4(payload: &str) -> Result<ParsedToken, Error> {
    let bytes = base64_decode(payload)?;
    let value: ciborium::value::Value =
        ciborium::de::from_reader(bytes.as_slice()).map_err(|e| Error::BadPayload(e.to_string()))?;

    let map = value
        .as_map()
        .ok_or_else(|| Error::BadPayload("expected a CBOR map".to_string()))?;

    let mut mint_url = None;
    let mut unit = "sat".to_string();
    let mut amount = 0u64;

    for (key, val) in map {
        match key.as_text() {
            Some("m") => mint_url = val.as_text().map(str::to_string),
            Some("u") => {
                if let Some(u) = val.as_text() {
                    unit = u.to_string();
                }
            }
            Some("t") => {
                let entries = val
                    .as_array()
                    .ok_or_else(|| Error::BadPayload("\"t\" is not an array".to_string()))?;
                for entry in entries {
                    let entry_map = entry
                        .as_map()
                        .ok_or_else(|| Error::BadPayload("keyset entry is not a map".to_string()))?;
                    for (ek, ev) in entry_map {
                        if ek.as_text() == Some("p") {
                            let proofs = ev
                                .as_array()
                                .ok_or_else(|| Error::BadPayload("\"p\" is not an array".to_string()))?;
                            for proof in proofs {
                                if let Some(proof_map) = proof.as_map() {
                                    for (pk, pv) in proof_map {
                                        if pk.as_text() == Some("a") {
                                            let value: Option<u64> =
                                                pv.as_integer().and_then(|i| u64::try_from(i).ok());
                                            amount += value.unwrap_or(0);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let mint_url = mint_url.ok_or_else(|| Error::BadPayload("missing mint url".to_string()))?;
    Ok(ParsedToken { mint_url, unit, amount })
}

const BASE64URL_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const BASE64_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_decode(input: &str) -> Result<Vec<u8>, Error> {
    let input = input.trim_end_matches('=');
    let alphabet = if input.contains('-') || input.contains('_') {
        BASE64URL_ALPHABET
    } else {
        BASE64_ALPHABET
    };

    let mut bits: u32 = 0;
    let mut bit_count = 0u32;
    let mut out = Vec::with_capacity(input.len() * 3 / 4 + 3);

    for ch in input.bytes() {
        let value = alphabet.iter().position(|&c| c == ch).ok_or(Error::BadBase64)? as u32;
        bits = (bits << 6) | value;
        bit_count += 6;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_tokens_without_a_cashu_prefix() {
        assert!(matches!(parse("notatoken"), Err(Error::BadPrefix)));
    }

    #[test]
    fn parses_a_v3_token() {
        let json = r#"{"token":[{"mint":"https://mint.example","proofs":[{"amount":4,"id":"00","secret":"s","C":"c"}]}],"unit":"sat"}"#;
        let encoded = base64_encode_for_test(json.as_bytes());
        let token = format!("cashuA{encoded}");
        let parsed = parse(&token).unwrap();
        assert_eq!(parsed.mint_url, "https://mint.example");
        assert_eq!(parsed.unit, "sat");
        assert_eq!(parsed.amount, 4);
    }

    #[test]
    fn rejects_multi_mint_v3_tokens() {
        let json = r#"{"token":[{"mint":"https://a","proofs":[]},{"mint":"https://b","proofs":[]}],"unit":"sat"}"#;
        let encoded = base64_encode_for_test(json.as_bytes());
        let token = format!("cashuA{encoded}");
        assert!(matches!(parse(&token), Err(Error::MultipleMints)));
    }

    fn base64_encode_for_test(bytes: &[u8]) -> String {
        let mut out = String::new();
        let mut bits: u32 = 0;
        let mut bit_count = 0u32;
        for &b in bytes {
            bits = (bits << 8) | b as u32;
            bit_count += 8;
            while bit_count >= 6 {
                bit_count -= 6;
                let idx = (bits >> bit_count) & 0x3f;
                out.push(BASE64URL_ALPHABET[idx as usize] as char);
            }
        }
        if bit_count > 0 {
            let idx = (bits << (6 - bit_count)) & 0x3f;
            out.push(BASE64URL_ALPHABET[idx as usize] as char);
        }
        out
    }
}
