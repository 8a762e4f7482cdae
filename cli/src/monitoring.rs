pub fn init_logger(verbose: bool) {
  use tracing::metadata::LevelFilter;
  use tracing_subscriber::fmt::format::FmtSpan;
  use tracing_subscriber::{
    filter::Directive, fmt, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
  };

  let default_directive = if verbose {
    Directive::from(LevelFilter::TRACE)
  } else {
    Directive::from(LevelFilter::INFO)
  };

  // -v turns on the full wire trace; RUST_LOG always wins
  let filter_directives = if let Ok(filter) = std::env::var("RUST_LOG") {
    filter
  } else if verbose {
    "mtkflash_cli=trace,mtkflash=trace".to_string()
  } else {
    "mtkflash_cli=info,mtkflash=info".to_string()
  };

  let filter = EnvFilter::builder()
    .with_default_directive(default_directive)
    .parse_lossy(filter_directives);

  tracing_subscriber::registry()
    .with(fmt::layer().with_span_events(FmtSpan::CLOSE).with_filter(filter))
    .init();

  tracing::debug!("initialized logger");
}
