/**
 * @module logging
 * @description Custom logging configuration for clean console output
 *
 * This module provides a custom tracing formatter that improves log readability by
 * conditionally displaying file location information. The goal is to reduce visual
 * noise in the console while preserving critical debugging information for errors.
 *
 * ## Design Philosophy
 *
 * Standard tracing output includes file:line information for all log levels, which
 * creates visual clutter during normal operation. This module implements a custom
 * formatter that only shows location information for ERROR and WARN levels, where
 * the specific code location is most valuable for debugging.
 *
 * ## Emoji Convention for Permanent Logs
 *
 * The codebase uses emojis to distinguish permanent production logs from temporary
 * debugging logs. This convention applies to INFO, DEBUG, and TRACE levels:
 * - Logs with emojis (🚀, 📒, 💸, etc.) are intended for production
 * - Logs without emojis are typically temporary debugging aids
 * - ERROR and WARN logs are always kept regardless of emoji usage
 *
 * ## ConditionalLocationFormatter
 *
 * A custom FormatEvent implementation that:
 * - Shows file:line for ERROR and WARN levels only
 * - Omits location information for INFO, DEBUG, and TRACE
 * - Preserves all other formatting (levels, spans, messages)
 *
 * Example output:
 * ```text
 * ERROR tally::occ:118: OCC conflict: Max number of 5 retries reached
 * WARN  tally::queue:201: Command 4f1f… dead-lettered after 5 retries
 * INFO  tally: 📒 Ledger opened at tally_data
 * DEBUG tally: 💸 Posted transaction 9c3a… (2 entries)
 * ```
 *
 * ## Usage
 *
 * The formatter is automatically applied when calling `init_logging()` in main.rs.
 * It integrates with the tracing ecosystem and respects RUST_LOG environment
 * variable settings. Integration tests build their own subscriber through
 * `create_base_env_filter` / `create_subscriber_builder` so they can pick a
 * quieter default level.
 */

use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, SubscriberBuilder};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Custom formatter that conditionally shows file:line only for ERROR and WARN levels
pub struct ConditionalLocationFormatter;

// Everything before the message body: the level alone for quiet levels, the
// level plus origin (target and, when known, file:line) for ERROR and WARN
fn write_prefix(writer: &mut Writer<'_>, metadata: &tracing::Metadata<'_>) -> std::fmt::Result {
    let level = metadata.level();
    if matches!(level, &Level::ERROR | &Level::WARN) {
        write!(writer, "{} {}", level, metadata.target())?;
        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            write!(writer, " {}:{}", file, line)?;
        }
    } else {
        write!(writer, "{}", level)?;
    }
    write!(writer, ": ")
}

impl<S, N> FormatEvent<S, N> for ConditionalLocationFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        write_prefix(&mut writer, event.metadata())?;

        // Span scope next, root first, colon-joined, with any fields a span
        // recorded rendered inline in braces
        if let Some(scope) = ctx.event_scope() {
            for (depth, span) in scope.from_root().enumerate() {
                if depth > 0 {
                    write!(writer, ":")?;
                }
                write!(writer, "{}", span.name())?;

                let extensions = span.extensions();
                let fields =
                    extensions.get::<tracing_subscriber::fmt::FormattedFields<N>>();
                match fields {
                    Some(fields) if !fields.is_empty() => write!(writer, "{{{}}}", fields)?,
                    _ => {}
                }
            }
            write!(writer, " ")?;
        }

        // Then the event's own fields and the terminating newline
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Build the env filter, suppressing sled's debug output
pub fn create_base_env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level))
        // Suppress sled's verbose debug output
        .add_directive("sled=warn".parse().expect("static directive"))
        .add_directive("pagecache=warn".parse().expect("static directive"))
}

/// Build a subscriber with the conditional-location formatter applied
pub fn create_subscriber_builder(
    env_filter: EnvFilter,
) -> SubscriberBuilder<
    tracing_subscriber::fmt::format::DefaultFields,
    ConditionalLocationFormatter,
    EnvFilter,
> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(ConditionalLocationFormatter)
}

/// Initialize the tracing subscriber with custom formatting
pub fn init_logging() {
    create_subscriber_builder(create_base_env_filter("info")).init();
}
