// Views for PTV Near Me console application
use crate::pnm_api::HealthStatus;
use crate::pnm_controllers::RefreshOutcome;
use crate::pnm_map::PopupContent;
use crate::pnm_models::{Coordinates, Notice, NoticeKind, StopRecord};
use std::io::{self, Write};

pub struct PNMViews;

impl PNMViews {
    pub fn show_welcome() {
        println!("\n{}", "═".repeat(70));
        println!("  ╔═══════════════════════════════════════════════════════════╗");
        println!("  ║            🚊 PTV NEAR ME - PUBLIC TRANSPORT VICTORIA      ║");
        println!("  ║              Nearby stops and live departures             ║");
        println!("  ╚═══════════════════════════════════════════════════════════╝");
        println!("{}", "═".repeat(70));
        println!("\n  🌐 Data source: PTV Timetable API");
        println!("     http://timetableapi.ptv.vic.gov.au");
        println!("\n{}", "═".repeat(70));
    }

    pub fn show_menu() {
        println!("\n{}", "─".repeat(60));
        println!("📋 MENU OPTIONS");
        println!("  1️⃣  Go to an address");
        println!("  2️⃣  Filter stops by name");
        println!("  3️⃣  Clear the filter");
        println!("  4️⃣  Show next departures for a stop 🕐");
        println!("  5️⃣  Zoom out (wider area)");
        println!("  6️⃣  Zoom in");
        println!("  0️⃣  Quit application");
        println!("{}", "─".repeat(60));
    }

    pub fn prompt_address() -> String {
        Self::prompt("\n📍 Enter an address\n   Examples: 'Flinders Street Station', '1 Spring St, Melbourne'\n➜ Address: ")
    }

    pub fn prompt_query() -> String {
        Self::prompt("\n🔎 Filter stops (leave empty to show all)\n➜ Filter: ")
    }

    /// Zero-based index of the chosen row, if the input is a valid row number.
    pub fn prompt_stop_number(count: usize) -> Option<usize> {
        let input = Self::prompt(&format!("\n➜ Enter stop number (1-{}): ", count));
        match input.parse::<usize>() {
            Ok(num) if num > 0 && num <= count => Some(num - 1),
            _ => None,
        }
    }

    fn prompt(text: &str) -> String {
        print!("{}", text);
        let _ = io::stdout().flush();
        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(_) => input.trim().to_string(),
            Err(_) => String::new(),
        }
    }

    pub fn show_stop_list(stops: &[StopRecord], query: &str, center: Coordinates) {
        println!("\n{}", "═".repeat(70));
        println!("🚏 STOPS NEAR {} ({} shown)", center, stops.len());
        if !query.is_empty() {
            println!("   Filtered by: '{}'", query);
        }
        println!("{}", "═".repeat(70));

        if stops.is_empty() {
            println!("\n⚠️  No stops in view");
            println!("  • Try zooming out or moving to another address");
            if !query.is_empty() {
                println!("  • Or clear the filter (option 3)");
            }
            return;
        }

        for (i, stop) in stops.iter().enumerate() {
            println!(
                "  {:>2}. {} {} ({})",
                i + 1,
                stop.route_type.icon().glyph(),
                stop.name,
                stop.route_type.label()
            );
        }
    }

    pub fn show_timetable(content: &PopupContent) {
        println!("\n{}", "═".repeat(70));
        println!("🕐 {} {}", content.title, content.subtitle);
        println!("{}", "═".repeat(70));

        if content.rows.is_empty() {
            println!("\n⚠️  No upcoming departures found");
            return;
        }

        println!("  {:<48} {}", "To:", "Time:");
        println!("{}", "─".repeat(70));
        for row in &content.rows {
            println!("  {:<48} {}", row.destination, row.time);
        }
        println!("{}", "═".repeat(70));
    }

    pub fn show_refresh_outcome(outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Applied(summary) => {
                println!(
                    "✓ Stops updated ({} new, {} gone, {} unchanged)",
                    summary.added, summary.removed, summary.kept
                );
            }
            RefreshOutcome::Stale => {}
            RefreshOutcome::Failed => {
                println!("   Keeping the stops found previously");
            }
        }
    }

    pub fn show_notice(notice: &Notice) {
        match notice.kind {
            NoticeKind::Error => eprintln!("\n❌ {}", notice.message),
            NoticeKind::Info => println!("\nℹ️  {}", notice.message),
        }
    }

    pub fn show_health(status: &HealthStatus) {
        let mark = |ok: bool| if ok { "✓" } else { "✗" };
        println!("\n📡 PTV API health check");
        println!("  {} Security token", mark(status.security_token_ok));
        println!("  {} Client clock", mark(status.client_clock_ok));
        println!("  {} Memcache", mark(status.memcache_ok));
        println!("  {} Database", mark(status.database_ok));
        if status.is_healthy() {
            println!("\n✓ All systems operational");
        } else {
            println!("\n⚠️  The service reports problems");
        }
    }

    pub fn address_not_found(address: &str, status: &str) {
        println!("\n✗ Could not find '{}' ({})", address, status);
        println!("   The map stays where it was.");
    }

    pub fn no_stops_listed() {
        println!("\n⚠️  No stops listed");
        println!("   Move the map or clear the filter first.");
    }

    pub fn show_loading(message: &str) {
        print!("\n⏳ {}...", message);
        let _ = io::stdout().flush();
    }

    pub fn clear_loading() {
        print!("\r{}\r", " ".repeat(60));
        let _ = io::stdout().flush();
    }

    pub fn goodbye_message() {
        println!("\n{}", "═".repeat(60));
        println!("👋 Thank you for using PTV Near Me!");
        println!("{}", "═".repeat(60));
    }
}
