//! Remote-signer connector (OISY).
//!
//! Requests are signed by a wallet running in a separate window, reached over
//! a message channel. Channel establishment and teardown both depend on that
//! window and are bounded by the configured signer timeouts. A session only
//! exists while the channel is open; nothing is resumable across reloads.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ConnectionStatus, Connector, ConnectorContext, ConnectorType};
use crate::actor::{Actor, RequestSignature, RequestSigner, ServiceDescriptor};
use crate::error::{ConnectError, ConnectResult, TransportError};
use crate::principal::Principal;
use crate::timeout::with_timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerAccount {
    pub owner: Principal,
}

/// An open channel to the signer window.
#[async_trait]
pub trait SignerChannel: Send + Sync + fmt::Debug {
    async fn accounts(&self) -> ConnectResult<Vec<SignerAccount>>;
    async fn sign(&self, owner: &Principal, content: &[u8]) -> ConnectResult<RequestSignature>;
    async fn close(&self) -> ConnectResult<()>;
}

/// Opens the signer window and performs the channel handshake.
#[async_trait]
pub trait SignerTransport: Send + Sync {
    async fn establish(&self) -> ConnectResult<Arc<dyn SignerChannel>>;
}

/// Request signer backed by the remote window.
#[derive(Debug)]
struct ChannelSigner {
    owner: Principal,
    channel: Arc<dyn SignerChannel>,
}

#[async_trait]
impl RequestSigner for ChannelSigner {
    fn principal(&self) -> Principal {
        self.owner.clone()
    }

    async fn sign(&self, content: &[u8]) -> ConnectResult<RequestSignature> {
        self.channel.sign(&self.owner, content).await
    }
}

pub struct RemoteSignerConnector {
    ctx: ConnectorContext,
    transport: Arc<dyn SignerTransport>,
    signer: Mutex<Option<Arc<ChannelSigner>>>,
}

impl RemoteSignerConnector {
    pub fn new(ctx: ConnectorContext, transport: Arc<dyn SignerTransport>) -> Self {
        Self { ctx, transport, signer: Mutex::new(None) }
    }

    fn current(&self) -> Option<Arc<ChannelSigner>> {
        self.signer.lock().ok()?.clone()
    }

    fn take(&self) -> Option<Arc<ChannelSigner>> {
        self.signer.lock().ok()?.take()
    }

    async fn close(&self, channel: &dyn SignerChannel) {
        match with_timeout(channel.close(), self.ctx.config.signer_disconnect_timeout).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "signer channel close failed"),
            Err(_) => tracing::warn!("signer channel close timed out"),
        }
    }

    async fn open(&self) -> ConnectResult<Arc<ChannelSigner>> {
        let channel = with_timeout(self.transport.establish(), self.ctx.config.signer_establish_timeout)
            .await
            .map_err(|t| t.into_error("signer channel establish"))??;

        let accounts = match channel.accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                self.close(channel.as_ref()).await;
                return Err(e);
            }
        };
        let owner = match accounts.into_iter().next() {
            None => Err(TransportError::NoAccounts),
            Some(account) if !account.owner.is_authenticated() => Err(TransportError::AnonymousAccount),
            Some(account) => Ok(account.owner),
        };
        match owner {
            Ok(owner) => Ok(Arc::new(ChannelSigner { owner, channel })),
            Err(e) => {
                self.close(channel.as_ref()).await;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Connector for RemoteSignerConnector {
    fn kind(&self) -> ConnectorType {
        ConnectorType::Oisy
    }

    async fn init(&self) -> ConnectResult<()> {
        Ok(())
    }

    async fn is_connected(&self) -> ConnectionStatus {
        match self.current() {
            Some(signer) => ConnectionStatus::connected(signer.owner.clone(), None),
            None => ConnectionStatus::disconnected(),
        }
    }

    async fn connect(&self) -> ConnectResult<ConnectionStatus> {
        if let Some(signer) = self.current() {
            return Ok(ConnectionStatus::connected(signer.owner.clone(), None));
        }
        let signer = self.open().await?;
        let owner = signer.owner.clone();
        let replaced = self.signer.lock().ok().and_then(|mut slot| slot.replace(signer));
        if let Some(stale) = replaced {
            self.close(stale.channel.as_ref()).await;
        }
        tracing::info!(principal = %owner, "remote signer connected");
        Ok(ConnectionStatus::connected(owner, None))
    }

    async fn disconnect(&self) {
        if let Some(signer) = self.take() {
            self.close(signer.channel.as_ref()).await;
        }
    }

    async fn create_actor(&self, canister_id: &Principal, descriptor: Arc<ServiceDescriptor>) -> ConnectResult<Actor> {
        let signer = self.current().ok_or(ConnectError::NotConnected)?;
        Actor::new(
            canister_id.clone(),
            descriptor,
            signer,
            self.ctx.transport.clone(),
            self.ctx.config.host.clone(),
        )
    }

    fn expired(&self) -> bool {
        false
    }
}
