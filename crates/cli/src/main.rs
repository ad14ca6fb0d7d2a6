// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! spooladm: administrative client for the spool scheduler.
//!
//! Flag-driven in the System V tradition: `-p` configures a printer,
//! `-x` deletes, `-d` sets the default. Exit code is 0 on success and
//! 1 on any failure.

mod client;

use anyhow::{bail, Context, Result};
use clap::Parser;
use client::Client;
use spool_core::Attribute;
use spool_wire::{Operation, Request};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "spooladm", about = "Configure spool print queues", disable_help_flag = true)]
struct Args {
    /// Scheduler to talk to (host:port).
    #[arg(short = 'h', value_name = "SERVER")]
    server: Option<String>,

    /// Set the default destination.
    #[arg(short = 'd', value_name = "DEST")]
    default_dest: Option<String>,

    /// Delete a destination (printer first, class as fallback).
    #[arg(short = 'x', value_name = "DEST")]
    delete: Option<String>,

    /// Create or modify a printer.
    #[arg(short = 'p', value_name = "PRINTER")]
    printer: Option<String>,

    /// Add the printer (-p) to this class.
    #[arg(short = 'c', value_name = "CLASS")]
    add_to_class: Option<String>,

    /// Remove the printer (-p) from this class.
    #[arg(short = 'r', value_name = "CLASS")]
    remove_from_class: Option<String>,

    /// Make-and-model string.
    #[arg(short = 'm', value_name = "MODEL")]
    model: Option<String>,

    /// Device address (scheme:... URI).
    #[arg(short = 'v', value_name = "URI")]
    device_uri: Option<String>,

    /// Description text.
    #[arg(short = 'D', value_name = "INFO")]
    info: Option<String>,

    /// Location text.
    #[arg(short = 'L', value_name = "LOCATION")]
    location: Option<String>,

    /// Device description (capability) file.
    #[arg(short = 'P', value_name = "FILE")]
    capability_file: Option<PathBuf>,

    /// Enable the destination and accept jobs.
    #[arg(short = 'E')]
    enable: bool,

    /// name=value options (job-quota-period, job-page-limit, job-k-limit,
    /// printer-error-policy, ...).
    #[arg(short = 'o', value_name = "NAME=VALUE")]
    options: Vec<String>,

    /// Print help.
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("spooladm: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    if args.default_dest.is_none() && args.delete.is_none() && args.printer.is_none() {
        bail!("nothing to do (use -p, -x, or -d)");
    }
    let server = args
        .server
        .clone()
        .unwrap_or_else(|| std::env::var("SPOOL_SERVER").unwrap_or_else(|_| "127.0.0.1:6631".into()));
    let mut client = Client::connect(&server).await?;

    if let Some(name) = &args.printer {
        configure_printer(&mut client, name, &args).await?;
    }
    if let Some(name) = &args.delete {
        delete_destination(&mut client, name).await?;
    }
    if let Some(name) = &args.default_dest {
        client
            .send(
                Request::new(Operation::SetDefault, client.user())
                    .with_attr("printer-name", Attribute::name(name.clone())),
            )
            .await?;
        println!("default destination set to {name}");
    }
    Ok(())
}

async fn configure_printer(client: &mut Client, name: &str, args: &Args) -> Result<()> {
    let mut request = Request::new(Operation::AddPrinter, client.user())
        .with_attr("printer-name", Attribute::name(name));
    if let Some(uri) = &args.device_uri {
        request = request.with_attr("device-uri", Attribute::Text(uri.clone()));
    }
    if let Some(info) = &args.info {
        request = request.with_attr("printer-info", Attribute::Text(info.clone()));
    }
    if let Some(location) = &args.location {
        request = request.with_attr("printer-location", Attribute::Text(location.clone()));
    }
    if let Some(model) = &args.model {
        request = request.with_attr("printer-make-and-model", Attribute::Text(model.clone()));
    }
    if let Some(path) = &args.capability_file {
        let record = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read capability file {}", path.display()))?;
        request = request.with_attr("capability-record", Attribute::Text(record));
    }
    if args.enable {
        request = request.with_attr("enabled", Attribute::Boolean(true));
    }
    for option in &args.options {
        let Some((key, value)) = option.split_once('=') else {
            bail!("bad option {option:?}, expected name=value");
        };
        let attr = match value.parse::<i64>() {
            Ok(n) => Attribute::Integer(n),
            Err(_) => Attribute::Text(value.to_string()),
        };
        request = request.with_attr(key, attr);
    }
    client.send(request).await?;
    println!("printer {name} configured");

    if let Some(class) = &args.add_to_class {
        client
            .send(
                Request::new(Operation::AddClass, client.user())
                    .with_attr("class-name", Attribute::name(class.clone()))
                    .with_attr("add-member", Attribute::name(name))
                    .with_attr("enabled", Attribute::Boolean(args.enable)),
            )
            .await?;
        println!("printer {name} added to class {class}");
    }
    if let Some(class) = &args.remove_from_class {
        client
            .send(
                Request::new(Operation::AddClass, client.user())
                    .with_attr("class-name", Attribute::name(class.clone()))
                    .with_attr("remove-member", Attribute::name(name)),
            )
            .await?;
        println!("printer {name} removed from class {class}");
    }
    Ok(())
}

/// `-x` deletes whichever kind owns the name: printer first, class next.
async fn delete_destination(client: &mut Client, name: &str) -> Result<()> {
    let deleted = client
        .send_allow_missing(
            Request::new(Operation::DeletePrinter, client.user())
                .with_attr("printer-name", Attribute::name(name)),
        )
        .await?;
    if deleted.is_none() {
        let as_class = client
            .send_allow_missing(
                Request::new(Operation::DeleteClass, client.user())
                    .with_attr("class-name", Attribute::name(name)),
            )
            .await?;
        if as_class.is_none() {
            bail!("destination \"{name}\" not found");
        }
    }
    println!("destination {name} deleted");
    Ok(())
}
