#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;

#[test]
fn encode_token_produces_url_safe_base64_without_padding() {
    let token = [42u8; 32];
    let encoded = encode_token(&token);
    assert!(!encoded.contains('+'));
    assert!(!encoded.contains('/'));
    assert!(!encoded.ends_with('='));
    assert_eq!(B64.decode(&encoded).expect("valid base64"), token);
}
