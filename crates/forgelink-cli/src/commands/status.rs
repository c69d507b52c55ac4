//! `status` command: sample coordinator diagnostics and print a table.

use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use std::sync::Arc;
use std::time::Duration;

use forgelink_core::types::PrinterDetails;
use forgelink_core::{MonitorSettings, PrinterMonitor};

use crate::cli::StatusArgs;
use crate::error::{CliError, Result};
use crate::simulated::SimulatedPrinter;

pub async fn run_status(args: StatusArgs, json: bool) -> Result<()> {
    if args.printers == 0 {
        return Err(CliError::InvalidArgument(
            "at least one printer is required".to_string(),
        ));
    }

    // Short cadences so a couple of ticks land within the settle window.
    let settings = MonitorSettings {
        active_interval_ms: 500,
        inactive_interval_ms: 500,
        retry_delay_ms: 250,
        ..Default::default()
    };
    let monitor = PrinterMonitor::new(settings);

    for i in 0..args.printers {
        let name = format!("printer-{}", i + 1);
        let details = PrinterDetails {
            name: name.clone(),
            address: format!("sim://{}", name),
            serial_number: None,
            camera_stream_url: None,
        };
        let backend = Arc::new(SimulatedPrinter::new(name, 0.0, i % 2 == 0));
        monitor.add_printer(details, backend).await?;
    }

    tokio::time::sleep(Duration::from_secs(args.settle)).await;

    let status = monitor.status();
    let contexts = monitor.all_contexts();

    if json {
        let payload = serde_json::json!({
            "coordinator": status,
            "contexts": contexts,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        monitor.dispose();
        return Ok(());
    }

    println!(
        "Coordinator: {} poller(s), active context: {}\n",
        status.poller_count,
        status
            .active_context_id
            .as_deref()
            .unwrap_or("-")
            .bold()
    );

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Printer", "Context", "Active", "Polling", "Interval", "State", "Job",
    ]);

    for context in &contexts {
        let diag = status
            .pollers
            .iter()
            .find(|p| p.context_id == context.id);
        let snapshot = monitor.polling_data(&context.id);

        let (state, job) = match &snapshot {
            Some(snap) => {
                let job = snap
                    .status
                    .current_job
                    .as_ref()
                    .map(|j| format!("{} ({:.0}%)", j.file_name, j.progress_percent))
                    .unwrap_or_else(|| "-".to_string());
                (snap.status.machine_state.display_name().to_string(), job)
            }
            None => ("no data".to_string(), "-".to_string()),
        };

        table.add_row(vec![
            Cell::new(&context.details.name),
            Cell::new(context.id.chars().take(8).collect::<String>()),
            Cell::new(if context.is_active { "yes" } else { "" }),
            Cell::new(match diag {
                Some(d) if d.running => "running",
                Some(_) => "stopped",
                None => "-",
            }),
            Cell::new(
                diag.map(|d| format!("{} ms", d.interval_ms))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(state),
            Cell::new(job),
        ]);
    }

    println!("{table}");

    monitor.dispose();
    Ok(())
}
