//! Actor - the signed request executor handed to remote-call sites.
//!
//! An actor binds one canister and one service descriptor to the signer of
//! the session that created it. The wire encoding of calls belongs to the
//! [`RpcTransport`]; here an envelope is only assembled, signed over the
//! SHA-256 of its JSON form, and handed over.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConnectError, ConnectResult};
use crate::identity::{hex_bytes, SignedDelegation};
use crate::principal::Principal;

const INGRESS_EXPIRY_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    Query,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: String,
    pub mode: CallMode,
}

/// Typed surface of a remote service, treated as opaque beyond method names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    methods: Vec<MethodSpec>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), methods: Vec::new() }
    }
    pub fn query(mut self, method: impl Into<String>) -> Self {
        self.methods.push(MethodSpec { name: method.into(), mode: CallMode::Query });
        self
    }
    pub fn update(mut self, method: impl Into<String>) -> Self {
        self.methods.push(MethodSpec { name: method.into(), mode: CallMode::Update });
        self
    }
    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.iter().find(|m| m.name == name)
    }
    pub fn methods(&self) -> &[MethodSpec] { &self.methods }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSignature {
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub delegations: Vec<SignedDelegation>,
}

/// Whatever can sign requests on behalf of a principal: a delegated identity,
/// an injected wallet's agent, or a remote signer channel.
#[async_trait]
pub trait RequestSigner: Send + Sync + fmt::Debug {
    fn principal(&self) -> Principal;
    async fn sign(&self, content: &[u8]) -> ConnectResult<RequestSignature>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Principal,
    pub canister_id: Principal,
    pub method: String,
    pub mode: CallMode,
    pub args: Value,
    pub ingress_expiry: DateTime<Utc>,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub content: Envelope,
    pub signature: RequestSignature,
}

impl SignedEnvelope {
    /// Bytes the signature was computed over.
    pub fn signed_bytes(&self) -> ConnectResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.content)?)
    }
}

/// Remote service RPC layer.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn submit(&self, host: &str, envelope: SignedEnvelope) -> ConnectResult<Value>;
}

#[derive(Clone)]
pub struct Actor {
    canister_id: Principal,
    descriptor: Arc<ServiceDescriptor>,
    signer: Arc<dyn RequestSigner>,
    transport: Arc<dyn RpcTransport>,
    host: String,
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("canister_id", &self.canister_id.to_text())
            .field("service", &self.descriptor.name)
            .field("principal", &self.signer.principal().to_text())
            .finish()
    }
}

impl Actor {
    /// Refuses anonymous signers: an actor is never silently downgraded.
    pub fn new(
        canister_id: Principal,
        descriptor: Arc<ServiceDescriptor>,
        signer: Arc<dyn RequestSigner>,
        transport: Arc<dyn RpcTransport>,
        host: impl Into<String>,
    ) -> ConnectResult<Self> {
        if !signer.principal().is_authenticated() {
            return Err(ConnectError::NotConnected);
        }
        Ok(Self { canister_id, descriptor, signer, transport, host: host.into() })
    }

    pub fn principal(&self) -> Principal { self.signer.principal() }
    pub fn canister_id(&self) -> &Principal { &self.canister_id }
    pub fn descriptor(&self) -> &ServiceDescriptor { &self.descriptor }

    pub async fn call(&self, method: &str, args: Value) -> ConnectResult<Value> {
        let spec = self.descriptor.method(method).ok_or_else(|| ConnectError::UnknownMethod {
            service: self.descriptor.name.clone(),
            method: method.to_string(),
        })?;
        let content = Envelope {
            sender: self.signer.principal(),
            canister_id: self.canister_id.clone(),
            method: spec.name.clone(),
            mode: spec.mode,
            args,
            ingress_expiry: Utc::now() + Duration::seconds(INGRESS_EXPIRY_SECS),
            nonce: nonce(),
        };
        let bytes = serde_json::to_vec(&content)?;
        let signature = self.signer.sign(&bytes).await?;
        tracing::debug!(canister = %self.canister_id, method, "submitting signed call");
        self.transport.submit(&self.host, SignedEnvelope { content, signature }).await
    }
}

fn nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
