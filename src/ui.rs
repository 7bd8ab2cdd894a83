//! Terminal output for the CLI

use colored::*;

use quill_core::{IngestionReport, RagAnswer, StoredDocument};

const BANNER_WIDTH: usize = 60;

pub fn display_banner(session_id: &str) {
    let top_border = format!("┌{}┐", "─".repeat(BANNER_WIDTH - 2));
    let bottom_border = format!("└{}┘", "─".repeat(BANNER_WIDTH - 2));

    println!();
    println!("{}", top_border.blue());
    for line in [
        "Quill - ask questions about your documents",
        "",
        "Answers come only from what you have ingested.",
        "Type 'reset' to forget this conversation, 'exit' to quit.",
    ] {
        let padding = " ".repeat(BANNER_WIDTH.saturating_sub(line.chars().count() + 4));
        println!("{}", format!("│  {}{}│", line, padding).blue());
    }
    println!("{}", bottom_border.blue());
    println!("{} {}", "session:".dimmed(), session_id.dimmed());
    println!();
}

pub fn print_answer(answer: &RagAnswer) {
    println!();
    if answer.is_refusal() {
        println!("{}", answer.answer.yellow());
    } else {
        println!("{}", answer.answer);
    }

    if answer.sources.is_empty() {
        println!();
        return;
    }

    println!();
    println!("{}", "Sources:".bold());
    for (i, source) in answer.sources.iter().enumerate() {
        let label = i + 1;
        let marker = if answer.citations.contains(&label) { "●".green() } else { "○".dimmed() };
        let location = match source.page {
            Some(page) => format!("{}, page {}", source.title, page),
            None => source.title.clone(),
        };
        println!(
            "  {} {} {} {}",
            marker,
            format!("[{}]", label).cyan(),
            location,
            format!("(distance {:.3})", source.score).dimmed()
        );
    }
    println!();
}

pub fn print_ingestion(report: &IngestionReport) {
    println!(
        "{} Indexed {} ({} pages, {} chunks) as {}",
        "✓".green(),
        report.title.bold(),
        report.pages,
        report.chunks,
        report.doc_id.cyan()
    );
}

pub fn print_history(session_id: &str, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        println!("{} Session {} has no history", "ℹ".blue(), session_id.cyan());
        return;
    }
    for (i, (question, answer)) in pairs.iter().enumerate() {
        println!("{} {}", format!("Q{}:", i + 1).green().bold(), question);
        println!("{} {}", format!("A{}:", i + 1).blue().bold(), answer);
        println!();
    }
}

pub fn print_stats(documents: &[StoredDocument], chunks: usize, sessions: &[String]) {
    println!("{}", "Corpus:".bold());
    if documents.is_empty() {
        println!("  {}", "no documents ingested yet".dimmed());
    }
    for doc in documents {
        println!("  • {} {} ({} chunks)", doc.title, format!("[{}]", doc.doc_id).dimmed(), doc.chunks);
    }
    println!("  {} chunks in total", chunks);
    println!("{} {}", "Sessions:".bold(), sessions.len());
}

pub fn print_error(err: &dyn std::fmt::Display) {
    eprintln!("{} {}", "✗".red(), err);
}
