//! Terminal output for the CLI commands.

use owo_colors::OwoColorize;
use storefront_search::filter::FilterOptions;
use storefront_search::{Availability, EngineStats, SearchResponse, Suggestion};
use storefront_telemetry::MetricsSnapshot;

/// Status message helpers
pub struct Status;

impl Status {
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        eprintln!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue(), message);
    }

    pub fn header(message: &str) {
        println!();
        println!("{}", message.bold());
        println!("{}", "─".repeat(message.chars().count()));
    }
}

/// Format a count with singular/plural
pub fn format_count(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

/// Format a price with two decimals
pub fn format_price(price: f64) -> String {
    format!("{price:.2}")
}

fn availability_label(availability: Availability) -> String {
    match availability {
        Availability::InStock => availability.as_str().green().to_string(),
        Availability::LowStock | Availability::Preorder => availability.as_str().yellow().to_string(),
        Availability::OutOfStock | Availability::Discontinued => availability.as_str().red().to_string(),
    }
}

pub fn print_search(response: &SearchResponse) {
    let page = &response.pagination;
    Status::header(&format!("Results for \"{}\"", response.query));

    if response.results.is_empty() {
        Status::info("No products matched");
    }
    for (offset, hit) in response.results.iter().enumerate() {
        let rank = (page.current_page - 1) * page.page_size + offset + 1;
        println!(
            "{:>3}. {} {} {}",
            rank,
            hit.name.bold(),
            format!("[{}]", hit.id).dimmed(),
            format!("score {:.3}", hit.relevance_score).cyan()
        );
        println!(
            "     {}  {}  {}",
            format_price(hit.price),
            hit.category,
            availability_label(hit.availability)
        );
        if let Some(reason) = &hit.reason {
            println!("     {}", reason.dimmed());
        }
    }

    println!();
    println!(
        "{}  page {}/{}  {}ms{}",
        format_count(page.total_results, "result", "results"),
        page.current_page,
        page.total_pages.max(1),
        response.response_time_ms,
        if response.cache_hit { "  (cached)" } else { "" }
    );
}

pub fn print_suggestions(prefix: &str, suggestions: &[Suggestion]) {
    Status::header(&format!("Suggestions for \"{prefix}\""));
    if suggestions.is_empty() {
        Status::info("No suggestions");
        return;
    }
    for suggestion in suggestions {
        println!(
            "  {} {}",
            suggestion.query,
            format!("({}x)", suggestion.occurrences).dimmed()
        );
    }
}

pub fn print_filter_options(options: &FilterOptions) {
    let title = match &options.category_scope {
        Some(scope) => format!("Filters in {scope}"),
        None => "Filters".to_string(),
    };
    Status::header(&title);
    println!("{}", format_count(options.total_products, "product", "products"));

    if let Some(range) = &options.price_range {
        println!();
        println!("{} {} - {}", "Price".bold(), format_price(range.min), format_price(range.max));
        for bucket in options.price_buckets.iter().filter(|b| b.count > 0) {
            let upper = bucket.max.map_or_else(|| "+".to_string(), format_price);
            println!("  {:>8} - {:<8} {}", format_price(bucket.min), upper, bucket.count);
        }
    }

    println!();
    println!("{}", "Categories".bold());
    for category in &options.categories {
        println!("  {:<20} {}", category.name, category.count);
    }

    println!();
    println!("{}", "Availability".bold());
    for entry in &options.availability {
        println!("  {:<20} {}", availability_label(entry.value), entry.count);
    }
}

pub fn print_stats(stats: &EngineStats, metrics: &MetricsSnapshot) {
    Status::header("Engine");
    println!("  index generation   {}", stats.index_generation);
    println!("  indexed products   {}", stats.indexed_products);
    println!("  cache entries      {}", stats.cache.entries);
    println!(
        "  cache              {}",
        if stats.cache.enabled { "enabled".green().to_string() } else { "disabled".yellow().to_string() }
    );
    println!("  suggestions        {}", stats.suggestions);

    if let Some(build) = metrics.histograms.get("index.build_ms") {
        println!("  index build        {:.1}ms", build.max);
    }
}
