//! Endpoint provisioning: certificate, endpoint, provision operation.

use std::net::IpAddr;
use std::sync::Arc;

use marshal_engine::middleware::{Body, UpsertEntity, Validate};
use marshal_engine::{ApiError, Command, Failure, Params, Workflow, WorkflowScope};
use serde_json::{Map, Value, json};

use crate::support::{RequireId, object};

/// `POST /accounts/:account_id/certificates`
pub fn create_certificate() -> Command {
	Command::post("create-certificate", "/accounts/:account_id/certificates")
		.with(Body(|p: &Params| {
			json!({
				"certificate_body": p.get("certificate_body"),
				"private_key": p.get("private_key"),
			})
		}))
		.with(UpsertEntity("certificates"))
}

/// `POST /services/:service_id/endpoints`
pub fn create_endpoint() -> Command {
	Command::post("create-endpoint", "/services/:service_id/endpoints")
		.with(Validate(validate_allowlist))
		.with(Body(|p: &Params| {
			json!({
				"type": p.get("type").cloned().unwrap_or_else(|| json!("default")),
				"certificate_id": p.get("certificate_id"),
				"internal": p.get("internal").cloned().unwrap_or(Value::Bool(false)),
				"ip_whitelist": p.get("ip_allowlist").cloned().unwrap_or_else(|| json!([])),
			})
		}))
		.with(UpsertEntity("endpoints"))
}

/// `POST /endpoints/:endpoint_id/operations` with type `provision`.
pub fn create_endpoint_operation() -> Command {
	Command::post("create-endpoint-operation", "/endpoints/:endpoint_id/operations")
		.with(Body(|_: &Params| json!({ "type": "provision" })))
		.with(UpsertEntity("operations"))
}

fn validate_allowlist(params: &Params) -> Result<(), Failure> {
	let Some(entries) = params.get("ip_allowlist").and_then(Value::as_array) else {
		return Ok(());
	};
	for entry in entries {
		let raw = entry.as_str().unwrap_or_default();
		let (addr, prefix) = raw.split_once('/').map_or((raw, None), |(a, p)| (a, Some(p)));
		let valid = addr.parse::<IpAddr>().is_ok_and(|ip| {
			let max_bits = if ip.is_ipv4() { 32 } else { 128 };
			prefix.is_none_or(|p| p.parse::<u8>().is_ok_and(|bits| bits <= max_bits))
		});
		if !valid {
			return Err(Failure::Validation(
				ApiError::validation("invalid_ip_allowlist", format!("'{raw}' is not an IP address or CIDR range")).with_context("entry", entry.clone()),
			));
		}
	}
	Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum CertificateChoice {
	/// No certificate, e.g. for a managed-TLS endpoint.
	None,
	Existing(String),
	New { certificate_body: String, private_key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionEndpoint {
	pub account_id: String,
	pub service_id: String,
	/// Endpoint type as understood by the backend, e.g. `https` or `tcp`.
	pub kind: String,
	pub certificate: CertificateChoice,
	pub internal: bool,
	pub ip_allowlist: Vec<String>,
}

impl ProvisionEndpoint {
	pub fn workflow_id(&self) -> String {
		format!("provision-endpoint-{}", self.service_id)
	}
}

/// Create certificate (when requested), create endpoint, create provision
/// operation. Success meta is `{endpoint_id, operation_id}`.
///
/// A created certificate, endpoint or operation without an id fails the
/// workflow with `missing_id`.
pub fn provision_endpoint(request: ProvisionEndpoint) -> Workflow {
	let certificate = Arc::new(create_certificate());
	let endpoint = Arc::new(create_endpoint());
	let operation = Arc::new(create_endpoint_operation());
	let request = Arc::new(request);
	let for_certificate = Arc::clone(&request);
	let for_endpoint = Arc::clone(&request);

	Workflow::new(request.workflow_id())
		.command_with("certificate", move |_: &WorkflowScope<'_>| {
			let CertificateChoice::New { certificate_body, private_key } = &for_certificate.certificate else {
				return None;
			};
			Some(certificate.invoke(object(json!({
				"account_id": for_certificate.account_id,
				"certificate_body": certificate_body,
				"private_key": private_key,
			}))))
		})
		.task("certificate_id", RequireId("certificate"))
		.command_with("endpoint", move |scope: &WorkflowScope<'_>| {
			let certificate_id = match &for_endpoint.certificate {
				CertificateChoice::None => Value::Null,
				CertificateChoice::Existing(id) => json!(id),
				CertificateChoice::New { .. } => scope.output("certificate_id").cloned().unwrap_or(Value::Null),
			};
			Some(endpoint.invoke(object(json!({
				"service_id": for_endpoint.service_id,
				"type": for_endpoint.kind,
				"certificate_id": certificate_id,
				"internal": for_endpoint.internal,
				"ip_allowlist": for_endpoint.ip_allowlist,
			}))))
		})
		.task("endpoint_id", RequireId("endpoint"))
		.command_with("operation", move |scope: &WorkflowScope<'_>| {
			let endpoint_id = scope.output("endpoint_id").cloned().unwrap_or(Value::Null);
			Some(operation.invoke(object(json!({ "endpoint_id": endpoint_id }))))
		})
		.task("operation_id", RequireId("operation"))
		.finish(|scope: &WorkflowScope<'_>| {
			let mut meta = Map::new();
			meta.insert("endpoint_id".into(), scope.output("endpoint_id").cloned().unwrap_or(Value::Null));
			meta.insert("operation_id".into(), scope.output("operation_id").cloned().unwrap_or(Value::Null));
			Ok(meta)
		})
}
