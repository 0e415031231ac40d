#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::spake2::{Role, Spake2};

#[test]
fn auth_token_and_encryption_key_differ() {
    let (client, client_msg) = Spake2::start(Role::Client, "pw");
    let (server, server_msg) = Spake2::start(Role::Server, "pw");
    let secret = client.finish(&server_msg).expect("finish");
    drop(server.finish(&client_msg).expect("finish"));

    let keys = derive_keys(&secret).expect("derive");
    assert_ne!(keys.auth_token, keys.encryption_key);
}

#[test]
fn both_sides_derive_identical_keys() {
    let (client, client_msg) = Spake2::start(Role::Client, "pw");
    let (server, server_msg) = Spake2::start(Role::Server, "pw");
    let client_secret = client.finish(&server_msg).expect("finish");
    let server_secret = server.finish(&client_msg).expect("finish");

    let client_keys = derive_keys(&client_secret).expect("derive");
    let server_keys = derive_keys(&server_secret).expect("derive");

    assert_eq!(client_keys.auth_token, server_keys.auth_token);
    assert_eq!(client_keys.encryption_key, server_keys.encryption_key);
}
