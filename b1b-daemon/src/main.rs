//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

use std::fmt;
use std::io::IsTerminal;

use clap::{crate_version, App, Arg};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

// stderr line format: an optional RFC-3164 priority tag, a file:line
// prefix when debugging, then "LEVEL: message".
struct LogFormat {
    syslog_tag: bool,
    debug: bool,
}

fn priority(level: Level) -> u8 {
    match level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        _ => 7,
    }
}

impl<S, N> FormatEvent<S, N> for LogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        if self.syslog_tag {
            write!(writer, "<{}>", priority(*metadata.level()))?;
        }
        if self.debug {
            if let (Some(file), Some(line)) =
                (metadata.file(), metadata.line())
            {
                write!(writer, "{}:{}: ", file, line)?;
            }
        }
        write!(writer, "{}: ", metadata.level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn init_tracing(debug: bool, syslog_tag: bool) {
    let max_level = if debug { Level::DEBUG } else { Level::INFO };

    tracing_subscriber::fmt()
        .event_format(LogFormat { syslog_tag, debug })
        .with_writer(std::io::stderr)
        .with_max_level(max_level)
        .init();
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("b1b")
        .version(crate_version!())
        .about(
            "Refreshes upstream MAC learning for bridged mode 1 bonds \
             after a failover",
        )
        .arg(
            Arg::with_name("debug")
                .short("d")
                .long("debug")
                .help("Enable debug logging"),
        )
        .arg(
            Arg::with_name("syslog")
                .short("l")
                .long("syslog")
                .conflicts_with("stderr")
                .help("Prefix log lines with syslog priority tags"),
        )
        .arg(
            Arg::with_name("stderr")
                .short("e")
                .long("stderr")
                .help("Write plain log lines without priority tags"),
        )
        .arg(
            Arg::with_name("interfaces")
                .value_name("ifname")
                .multiple(true)
                .help("Bond interfaces to monitor (default: auto-detect)"),
        )
        .get_matches();

    let debug = matches.is_present("debug");
    let syslog_tag = if matches.is_present("syslog") {
        true
    } else if matches.is_present("stderr") {
        false
    } else {
        // Assume a service manager is capturing stderr.
        !std::io::stderr().is_terminal()
    };
    let ifnames: Vec<String> = matches
        .values_of("interfaces")
        .map(|values| values.map(str::to_owned).collect())
        .unwrap_or_default();

    init_tracing(debug, syslog_tag);

    // The daemon is strictly single-threaded; everything runs on one
    // cooperative loop.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime");

    let result = runtime.block_on(async {
        let mut daemon = b1b_bond::Daemon::init(&ifnames).await?;
        daemon.run().await
    });

    if let Err(error) = result {
        error.log();
        std::process::exit(1);
    }
}
