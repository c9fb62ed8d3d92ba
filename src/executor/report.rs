use colored::*;
use std::fmt;
use std::path::Path;

use crate::models::metrics::Metrics;

/// Console view of a final report.
pub struct Report<'a>(pub &'a Metrics);

impl fmt::Display for Report<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        let s = &m.summary;
        let lat = &s.latency;

        let stages = m
            .stages
            .iter()
            .map(|st| format!("{}→{}", humantime::format_duration(st.duration), st.target))
            .collect::<Vec<_>>()
            .join(", ");

        writeln!(out)?;
        writeln!(out, "{}", "🔥 ======== TEST RESULTS ======== 🔥".bold().white().on_blue())?;
        writeln!(out, "{} {}", "⏰ Timestamp                :".bright_blue().bold(), m.timestamp.bold())?;
        writeln!(out, "{} {}", "🧪 Test                     :".bright_blue().bold(), m.name.bold())?;
        writeln!(out, "{} {} {}", "🎯 Target                   :".bright_blue().bold(), m.http_method.bold(), m.target_url.bold())?;
        writeln!(out, "{} {}", "📶 Stages                   :".bright_blue().bold(), stages.bold())?;
        writeln!(out, "{} {}", "👥 Max virtual users        :".bright_blue().bold(), m.max_vus.to_string().bold())?;
        writeln!(out, "{} {}", "✅ Total requests           :".bright_green().bold(), s.total_requests.to_string().bold())?;
        writeln!(out, "{} {}", "✅ Successful requests      :".bright_green().bold(), s.successful_requests.to_string().bold())?;
        writeln!(out, "{} {}", "❌ Failed requests          :".bright_red().bold(), s.failed_requests.to_string().bold())?;
        writeln!(out, "{} {}", "❌ Error rate               :".bright_red().bold(), format!("{:.2}%", s.error_rate * 100.0).bold())?;
        writeln!(out, "{} {}", "⚡ Fastest response (ms)    :".bright_cyan().bold(), format!("{:.2}", lat.fastest_response).bold())?;
        writeln!(out, "{} {}", "🐢 Slowest response (ms)    :".bright_yellow().bold(), format!("{:.2}", lat.slowest_response).bold())?;
        writeln!(out, "{} {}", "📊 Mean response time (ms)  :".bright_magenta().bold(), format!("{:.2}", lat.mean_response_time).bold())?;
        writeln!(out, "{} {}", "📊 Median response time (ms):".bright_magenta().bold(), format!("{:.2}", lat.median_response_time).bold())?;
        writeln!(
            out,
            "{} {}",
            "📊 p90 / p95 / p99 (ms)     :".bright_magenta().bold(),
            format!("{:.2} / {:.2} / {:.2}", lat.p90, lat.p95, lat.p99).bold()
        )?;
        writeln!(out, "{} {}", "📈 Requests per second (RPS):".bright_blue().bold(), format!("{:.2}", m.throughput).bold())?;
        writeln!(
            out,
            "{} {}",
            "🖥️  Generator host           :".bright_blue().bold(),
            format!(
                "{} cores, {} MiB free of {} MiB",
                m.host.cpu_cores,
                m.host.available_memory / (1024 * 1024),
                m.host.total_memory / (1024 * 1024)
            )
            .bold()
        )?;

        writeln!(out)?;
        writeln!(out, "{}", "✔️  ======== CHECKS ========".bold().white().on_blue())?;
        for (name, count) in &s.checks {
            let total = count.passes + count.fails;
            let line = format!("• {}: {} passed, {} failed", name, count.passes, count.fails);
            if count.fails == 0 && total > 0 {
                writeln!(out, "{}", line.green().bold())?;
            } else {
                writeln!(out, "{}", line.red().bold())?;
            }
        }

        writeln!(out)?;
        writeln!(out, "{}", "📦 ======== STATUS BREAKDOWN ========".bold().white().on_blue())?;
        for (status, count) in &s.status_counts {
            writeln!(out, "{}", format!("• {}: {}", status, count).bold())?;
        }

        if !s.rates.is_empty() {
            writeln!(out)?;
            writeln!(out, "{}", "📐 ======== RATES ========".bold().white().on_blue())?;
            for (name, rate) in &s.rates {
                writeln!(
                    out,
                    "{}",
                    format!("• {}: {:.2}% ({} of {})", name, rate.ratio() * 100.0, rate.hits, rate.total).bold()
                )?;
            }
        }

        if let Some(limit) = m.error_threshold {
            writeln!(out)?;
            if m.degraded() {
                writeln!(
                    out,
                    "{}",
                    format!("⚠️  error rate {:.2}% exceeds threshold {:.2}%", s.error_rate * 100.0, limit * 100.0)
                        .yellow()
                        .bold()
                )?;
            } else {
                writeln!(
                    out,
                    "{}",
                    format!("🟢 error rate within threshold {:.2}%", limit * 100.0).green().bold()
                )?;
            }
        }

        Ok(())
    }
}

/// Renders the final report as it is printed to the console.
pub fn render(m: &Metrics) -> String {
    Report(m).to_string()
}

pub fn print_report(m: &Metrics) {
    print!("{}", Report(m));
}

/// Writes the report as pretty JSON.
pub fn export_json(m: &Metrics, path: impl AsRef<Path>) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(m)?;
    std::fs::write(path, json)
}
