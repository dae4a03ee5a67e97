//! Plain-text rendering of run results and per-answer statistics.

use bajor_ai::AnswerSummary;
use bajor_core::Question;

use crate::predict::PredictStats;

const MAX_ROWS: usize = 20;

pub fn print_run_stats(stats: &PredictStats) {
    let [g, a, s] = stats.shape;
    println!("=== Predictions ===");
    println!("  {:<26} {}", "galaxies", g);
    println!("  {:<26} {}", "answers", a);
    println!("  {:<26} {}", "samples", s);
    println!("  {:<26} {:.1}s", "elapsed", stats.elapsed_secs);
    println!(
        "  {:<26} {} ({})",
        "output",
        stats.output.display(),
        stats.format.as_str()
    );
}

/// One answer's expected vote fraction and its uncertainty, per galaxy.
///
/// `limit` caps the number of galaxy rows shown; `None` shows [`MAX_ROWS`].
pub fn print_answer_summary(
    answer: &str,
    question: &Question,
    ids: &[String],
    summary: &AnswerSummary<f32>,
    limit: Option<usize>,
) {
    println!("=== {answer} ===");
    println!(
        "question '{}' (columns {}-{})",
        question.name, question.start_index, question.end_index
    );
    println!();
    println!("  {:<26} {:>12} {:>12} {:>12}", "id_str", "expectation", "variance", "std");

    let shown = ids.len().min(limit.unwrap_or(MAX_ROWS));
    for (i, id) in ids.iter().enumerate().take(shown) {
        let e = summary.expectation[i];
        let v = summary.variance[i];
        println!("  {:<26} {:>12.4} {:>12.6} {:>12.4}", id, e, v, v.max(0.0).sqrt());
    }
    if shown < ids.len() {
        println!("  ... {} more", ids.len() - shown);
    }

    if let (Some(e), Some(v)) = (summary.expectation.mean(), summary.variance.mean()) {
        println!("  {:<26} {:>12.4} {:>12.6}", "(mean)", e, v);
    }
    println!();
}
