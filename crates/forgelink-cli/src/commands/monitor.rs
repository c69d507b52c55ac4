//! `monitor` command: stream monitor events until interrupted.

use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use forgelink_core::types::PrinterDetails;
use forgelink_core::{MonitorEvent, MonitorSettings, PrinterMonitor};

use crate::cli::MonitorArgs;
use crate::error::{CliError, Result};
use crate::simulated::SimulatedPrinter;

pub async fn run_monitor(args: MonitorArgs, json: bool) -> Result<()> {
    if args.printers == 0 {
        return Err(CliError::InvalidArgument(
            "at least one printer is required".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(CliError::InvalidArgument(
            "failure-rate must be between 0.0 and 1.0".to_string(),
        ));
    }

    let settings = MonitorSettings {
        active_interval_ms: args.active_interval,
        inactive_interval_ms: args.inactive_interval,
        retry_delay_ms: args.retry_delay,
        max_retries: args.max_retries,
        webhook_url: args.webhook.clone(),
        ..Default::default()
    };
    let monitor = Arc::new(PrinterMonitor::new(settings));

    // Subscribe before registering printers so creation events are shown.
    let mut rx = monitor.subscribe();

    for i in 0..args.printers {
        let name = format!("printer-{}", i + 1);
        let details = PrinterDetails {
            name: name.clone(),
            address: format!("sim://{}", name),
            serial_number: None,
            camera_stream_url: None,
        };
        // Every other printer carries a material station.
        let backend = Arc::new(SimulatedPrinter::new(name, args.failure_rate, i % 2 == 0));
        monitor.add_printer(details, backend).await?;
    }

    if let Some(secs) = args.switch_every {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                rotate_active(&monitor);
            }
        });
    }

    if !json {
        println!(
            "Monitoring {} simulated printer(s). Press Ctrl-C to stop.\n",
            args.printers
        );
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => print_event(&monitor, &event, json),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    monitor.dispose();
    Ok(())
}

/// Foreground the context created after the currently active one, wrapping
/// around at the end.
fn rotate_active(monitor: &PrinterMonitor) {
    let contexts = monitor.all_contexts();
    if contexts.len() < 2 {
        return;
    }
    let active_pos = contexts.iter().position(|c| c.is_active).unwrap_or(0);
    let next = &contexts[(active_pos + 1) % contexts.len()];
    if let Err(e) = monitor.switch_to(&next.id) {
        warn!(error = %e, "rotation switch failed");
    }
}

fn display_name(monitor: &PrinterMonitor, context_id: &str) -> String {
    monitor
        .get_context(context_id)
        .map(|c| c.details.name)
        .unwrap_or_else(|| short_id(context_id))
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn print_event(monitor: &PrinterMonitor, event: &MonitorEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{}", line);
        }
        return;
    }

    let ts = chrono::Local::now().format("%H:%M:%S");
    match event {
        MonitorEvent::ContextCreated { context } => {
            println!(
                "{} {} {} ({})",
                ts,
                "[created]".green(),
                context.details.name,
                short_id(&context.id)
            );
        }
        MonitorEvent::ContextSwitched {
            context_id,
            previous_id,
        } => {
            let from = previous_id
                .as_deref()
                .map(|id| display_name(monitor, id))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{} {} {} -> {}",
                ts,
                "[switched]".cyan(),
                from,
                display_name(monitor, context_id)
            );
        }
        MonitorEvent::ContextRemoved {
            context_id,
            was_active,
        } => {
            let marker = if *was_active { " (was active)" } else { "" };
            println!(
                "{} {} {}{}",
                ts,
                "[removed]".yellow(),
                short_id(context_id),
                marker
            );
        }
        MonitorEvent::ContextUpdated { context } => {
            println!(
                "{} {} {}",
                ts,
                "[updated]".cyan(),
                context.details.name
            );
        }
        MonitorEvent::PollingStarted { context_id } => {
            println!(
                "{} {} {}",
                ts,
                "[polling]".green(),
                display_name(monitor, context_id)
            );
        }
        MonitorEvent::PollingStopped { context_id } => {
            println!(
                "{} {} {}",
                ts,
                "[stopped]".yellow(),
                display_name(monitor, context_id)
            );
        }
        MonitorEvent::PollingData { context_id, data } => {
            let status = &data.status;
            let job = status
                .current_job
                .as_ref()
                .map(|j| format!("  {} {:.1}%", j.file_name, j.progress_percent))
                .unwrap_or_default();
            println!(
                "{} {} {:<12} {:<9} nozzle {:>3.0}/{:<3.0}  bed {:>3.0}/{:<3.0}{}",
                ts,
                "[data]".normal(),
                display_name(monitor, context_id),
                status.machine_state.display_name(),
                status.nozzle_temp,
                status.nozzle_target,
                status.bed_temp,
                status.bed_target,
                job
            );
        }
        MonitorEvent::PollingError {
            context_id,
            message,
        } => {
            println!(
                "{} {} {}: {}",
                ts,
                "[error]".red(),
                display_name(monitor, context_id),
                message
            );
        }
        MonitorEvent::ResourceError {
            context_id,
            resource,
            message,
        } => {
            println!(
                "{} {} {} {}: {}",
                ts,
                "[resource]".red(),
                display_name(monitor, context_id),
                resource,
                message
            );
        }
    }
}
