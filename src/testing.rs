//! 單元測試共用的輔助函式。

use std::{
    collections::VecDeque,
    sync::{Mutex, OnceLock},
};

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    x509::{X509NameBuilder, X509},
};
use serde_json::{json, Value};

use crate::{
    codec::base64url_decode,
    identity::Identity,
    key_pair::KeyPair,
    transport::{RawResponse, Transport, TransportError},
};

/// 依序回放預先排入之回應的傳輸層，並記錄收到的請求。
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<RawResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// [`MockTransport`] 記錄下的一次請求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub body: Option<String>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: RawResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// 尚未被取用的回應數量。
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

impl Transport for MockTransport {
    fn send(&self, url: &str, body: Option<&str>) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            body: body.map(ToString::to_string),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Http(format!("no scripted response for {}", url)))
    }
}

pub const DIRECTORY_URL: &str = "https://ca/directory";

/// 以同一把 1024 位元金鑰建立身分，避免每個測試重新產生金鑰。
pub fn test_identity() -> Identity {
    static PEM: OnceLock<Vec<u8>> = OnceLock::new();
    let pem = PEM.get_or_init(|| {
        KeyPair::generate(Some(1024))
            .and_then(|key_pair| key_pair.to_pem())
            .unwrap()
    });
    Identity::from_key_pair(KeyPair::from_pem(pem).unwrap()).unwrap()
}

pub fn directory_json() -> Value {
    json!({
        "new-reg": "https://ca/acme/new-reg",
        "new-authz": "https://ca/acme/new-authz",
        "new-cert": "https://ca/acme/new-cert",
        "revoke-cert": "https://ca/acme/revoke-cert",
        "meta": {"terms-of-service": "https://ca/tos.pdf"}
    })
}

pub fn directory_response(nonce: &str) -> RawResponse {
    RawResponse::new(200)
        .header("Replay-Nonce", nonce)
        .json(&directory_json())
}

fn decode_segment(request: &RecordedRequest, field: &str) -> Value {
    let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    let segment = base64url_decode(body[field].as_str().unwrap()).unwrap();
    serde_json::from_slice(&segment).unwrap()
}

/// 解出簽署請求的受保護標頭。
pub fn protected_of(request: &RecordedRequest) -> Value {
    decode_segment(request, "protected")
}

/// 解出簽署請求的載荷。
pub fn payload_of(request: &RecordedRequest) -> Value {
    decode_segment(request, "payload")
}

/// 產生自簽證書（DER），有效期自 2024-01-01 起 90 天。
pub fn self_signed_der(cn: &str) -> Vec<u8> {
    let key_pair = KeyPair::generate(Some(1024)).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key_pair.pri_key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(1_704_067_200).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(1_704_067_200 + 90 * 86400).unwrap())
        .unwrap();
    builder.sign(&key_pair.pri_key, MessageDigest::sha256()).unwrap();
    builder.build().to_der().unwrap()
}
