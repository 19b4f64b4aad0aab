//! Credentials consulted by the chain. Storage belongs to the embedder.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::chain::{Middleware, Next};
use crate::context::Context;
use crate::error::Failure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
	Manage,
	Elevated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	pub token: String,
	pub scope: Scope,
	pub expires_at: DateTime<Utc>,
}

impl Credential {
	pub fn new(token: impl Into<String>, scope: Scope, expires_at: DateTime<Utc>) -> Self {
		Self {
			token: token.into(),
			scope,
			expires_at,
		}
	}

	pub fn is_expired(&self) -> bool {
		self.expires_at <= Utc::now()
	}

	/// Elevated scope that has not yet expired.
	pub fn is_elevated(&self) -> bool {
		self.scope == Scope::Elevated && !self.is_expired()
	}
}

/// Holder of the current credential.
pub trait CredentialStore: Send + Sync + 'static {
	fn current(&self) -> Option<Credential>;
	fn store(&self, credential: Credential);
	fn clear(&self);
}

/// Credential store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
	current: RwLock<Option<Credential>>,
}

impl MemoryCredentials {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(credential: Credential) -> Self {
		Self {
			current: RwLock::new(Some(credential)),
		}
	}
}

impl CredentialStore for MemoryCredentials {
	fn current(&self) -> Option<Credential> {
		self.current.read().clone()
	}

	fn store(&self, credential: Credential) {
		*self.current.write() = Some(credential);
	}

	fn clear(&self) {
		*self.current.write() = None;
	}
}

/// Built-in chain step attaching `Authorization: Bearer <token>`.
///
/// An authorization header set earlier in the chain is left alone, as is an
/// expired credential.
pub(crate) struct Authorize;

#[async_trait]
impl Middleware for Authorize {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		if ctx.request.header("authorization").is_none()
			&& let Some(credential) = next.engine().credentials().current()
			&& !credential.is_expired()
		{
			ctx.request.set_header("authorization", format!("Bearer {}", credential.token));
		}
		next.run(ctx).await;
		Ok(())
	}
}
