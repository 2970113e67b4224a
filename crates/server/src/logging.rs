use thingkit_invocation::InvocationLogLayer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, fmt};

/// Installs the global subscriber: `fmt` output at `level`, plus the layer
/// copying events raised inside action bodies into their invocation logs.
pub fn init(level: tracing::Level) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
	let subscriber = tracing_subscriber::registry()
		.with(fmt::layer().with_thread_names(true).with_filter(LevelFilter::from_level(level)))
		.with(InvocationLogLayer::new());
	tracing::subscriber::set_global_default(subscriber)
}
