// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::io::BufRead;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use weir_core::{Object, Result, ServiceConfig};
use weir_flow::{DataFlowGraph, DestinationKind, UdlInvocation, UserDefinedLogic};
use weir_runtime::RuntimeOptions;
use weir_service::{ServiceClient, ServiceHost};

/// Logs every matched delivery. Handy as a DFG sink while wiring a
/// pipeline up.
const CONSOLE_PRINTER_UDL: &str = "48e60f7c-8500-11eb-8755-0242ac110002";

/// Forwards the value unchanged to every declared output.
const FORWARDER_UDL: &str = "cc1a1472-8500-11eb-8755-0242ac110002";

struct ConsolePrinter;

impl UserDefinedLogic for ConsolePrinter {
	fn handle(&self, invocation: UdlInvocation<'_>) {
		info!(
			key = invocation.key,
			version = %invocation.version,
			worker = invocation.worker_id,
			bytes = invocation.value.blob.len(),
			"delivery"
		);
	}
}

struct Forwarder {
	client: Arc<ServiceClient>,
}

impl UserDefinedLogic for Forwarder {
	fn handle(&self, invocation: UdlInvocation<'_>) {
		let suffix = &invocation.key[invocation.prefix_length..];
		for (output, kind) in invocation.outputs.iter() {
			let object =
				Object::new(format!("{output}{suffix}"), invocation.value.blob.0.clone());
			let emitted = match kind {
				DestinationKind::Put => self.client.put(object).map(|_| ()),
				DestinationKind::TriggerPut => self.client.trigger_put(object),
			};
			if let Err(err) = emitted {
				error!(key = invocation.key, %output, "forwarding failed: {err}");
			}
		}
	}
}

fn usage() -> ! {
	eprintln!("usage: weir-server <config.json> [dfgs.json] [storage-dir]");
	std::process::exit(2);
}

fn run() -> Result<()> {
	let mut args = std::env::args().skip(1);
	let config_path = args.next().unwrap_or_else(|| usage());
	let dfgs_path = args.next();
	let storage_dir = args.next().map(std::path::PathBuf::from);

	let config = ServiceConfig::load(&config_path)?;
	let dfgs = match &dfgs_path {
		Some(path) => DataFlowGraph::load_all(path)?,
		None => Vec::new(),
	};

	let host = ServiceHost::build(
		config,
		dfgs,
		RuntimeOptions {
			storage_dir,
			signer_seed: None,
		},
		|client, udls| {
			udls.register(CONSOLE_PRINTER_UDL, |_config| {
				Arc::new(ConsolePrinter) as Arc<dyn UserDefinedLogic>
			});
			let forward_client = Arc::clone(client);
			udls.register(FORWARDER_UDL, move |_config| {
				Arc::new(Forwarder {
					client: Arc::clone(&forward_client),
				}) as Arc<dyn UserDefinedLogic>
			});
			Ok(())
		},
	)?;
	info!("weir server running; close stdin to stop");

	// Serve until the controlling process closes stdin.
	let stdin = std::io::stdin();
	for line in stdin.lock().lines() {
		if line.is_err() {
			break;
		}
	}

	host.shut_down();
	Ok(())
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.init();

	if let Err(err) = run() {
		error!("initialization failed: {err}");
		std::process::exit(1);
	}
}
