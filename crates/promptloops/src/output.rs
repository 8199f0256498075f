//! Terminal output helpers for evaluation results.

use chrono::{DateTime, Utc};
use colored::Colorize;

use promptloops_core::EvaluationOutcome;
use promptloops_db::{EpochRecord, EvaluationRecord, EvaluationStatus, EvaluationSummary, StoreStats};

pub fn print_outcome(outcome: &EvaluationOutcome) {
    match outcome {
        EvaluationOutcome::MaxEpochsReached {
            epochs,
            accepted_epochs,
            best_prompt,
            cumulative_improvement,
            total_duration_secs,
        } => {
            eprintln!();
            eprintln!("{}", "=== COMPLETED ===".bright_green().bold());
            eprintln!("Epochs: {} ({} accepted)", epochs, accepted_epochs);
            eprintln!("Cumulative improvement: {:+.1}", cumulative_improvement);
            eprintln!("Duration: {:.1}s", total_duration_secs);
            eprintln!();
            eprintln!("{}", "Best prompt:".bold());
            eprintln!("{}", best_prompt);
        }
        EvaluationOutcome::Converged {
            epochs,
            accepted_epochs,
            consecutive_rejections,
            best_prompt,
            cumulative_improvement,
            total_duration_secs,
        } => {
            eprintln!();
            eprintln!("{}", "=== CONVERGED ===".bright_green().bold());
            eprintln!(
                "Stopped after {} epochs ({} accepted, {} consecutive rejections)",
                epochs, accepted_epochs, consecutive_rejections
            );
            eprintln!("Cumulative improvement: {:+.1}", cumulative_improvement);
            eprintln!("Duration: {:.1}s", total_duration_secs);
            eprintln!();
            eprintln!("{}", "Best prompt:".bold());
            eprintln!("{}", best_prompt);
        }
        EvaluationOutcome::Paused {
            epochs,
            total_duration_secs,
            ..
        } => {
            eprintln!();
            eprintln!("{}", "=== PAUSED ===".yellow().bold());
            eprintln!("Paused after {} epoch(s)", epochs);
            eprintln!("Duration: {:.1}s", total_duration_secs);
            eprintln!("Run again to resume.");
        }
        EvaluationOutcome::Failed {
            epochs,
            error,
            total_duration_secs,
        } => {
            eprintln!();
            eprintln!("{}", "=== FAILED ===".bright_red().bold());
            eprintln!("Error after {} epoch(s): {}", epochs, error);
            eprintln!("Duration: {:.1}s", total_duration_secs);
        }
    }
}

pub fn print_evaluation_list(summaries: &[EvaluationSummary]) {
    if summaries.is_empty() {
        println!("No evaluations found.");
        return;
    }

    println!(
        "{:<38} {:<10} {:>6} {:>12} {:<17} {}",
        "ID".bold(),
        "STATUS".bold(),
        "EPOCH".bold(),
        "IMPROVEMENT".bold(),
        "UPDATED".bold(),
        "PROMPT".bold()
    );
    for summary in summaries {
        println!(
            "{:<38} {:<10} {:>6} {:>+12.1} {:<17} {}",
            summary.id,
            status_label(summary.status),
            summary.current_epoch,
            summary.cumulative_improvement,
            format_timestamp(&summary.updated_at),
            summary.prompt_preview
        );
    }
}

pub fn print_evaluation(record: &EvaluationRecord, epochs: &[EpochRecord]) {
    println!("{} {}", "Evaluation".bold(), record.id);
    println!("Status: {}", status_label(record.status));
    println!("Created: {}", format_timestamp(&record.created_at));
    println!("Epochs: {}", record.current_epoch);
    println!(
        "Cumulative improvement: {:+.1}",
        record.cumulative_improvement
    );
    if let Some(error) = &record.error {
        println!("Error: {}", error.bright_red());
    }
    println!();
    println!("{}", "Source prompt:".bold());
    println!("{}", record.source_prompt);
    println!();
    println!("{}", "Best prompt:".bold());
    println!("{}", record.best_prompt);

    if !epochs.is_empty() {
        println!();
        println!("{}", "Epoch trail:".bold());
        for epoch in epochs {
            let marker = if epoch.is_accepted {
                "accepted".bright_green()
            } else {
                "rejected".dimmed()
            };
            let measured = epoch
                .measured_value
                .map(|v| format!("{:.1}", v))
                .unwrap_or_else(|| "-".to_string());
            println!("  #{:<3} {:>8}  measured {}", epoch.number, marker, measured);
        }
    }
}

pub fn print_stats(stats: &StoreStats) {
    println!("Evaluations: {}", stats.total_evaluations);
    println!("  completed: {}", stats.completed_evaluations);
    println!("Epochs: {}", stats.total_epochs);
    println!("  accepted: {}", stats.accepted_epochs);
    println!("Average improvement: {:+.1}", stats.avg_improvement);
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

fn status_label(status: EvaluationStatus) -> colored::ColoredString {
    match status {
        EvaluationStatus::Pending => "pending".normal(),
        EvaluationStatus::Running => "running".bright_blue(),
        EvaluationStatus::Paused => "paused".yellow(),
        EvaluationStatus::Completed => "completed".bright_green(),
        EvaluationStatus::Failed => "failed".bright_red(),
    }
}
