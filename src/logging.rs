use std::io::Write;

use env_logger::Builder;
use log::Level;

/// Initialize the process-wide logger.
///
/// Grounded on `cryptotrader.logging.EMOJIFormatter`/`TelegramHandler`: the
/// original prefixes every record with a level emoji and duplicates
/// records onto a `TelegramHandler` for operator-facing notifications.
/// This port keeps the emoji-prefixed formatting but realizes the
/// notification channel as the `target: "operator"` logger target
/// (see the call sites in [`crate::venue`] and
/// [`crate::strategy::arbitrage`]) rather than wiring an actual Telegram
/// client, since outbound notification delivery is out of scope here.
pub fn init(debug: bool) {
    let mut builder = Builder::from_env(env_logger::Env::default().default_filter_or(if debug { "debug" } else { "info" }));
    builder.format(|buf, record| {
        let emoji = match record.level() {
            Level::Error => "\u{1F534}",
            Level::Warn => "\u{1F7E0}",
            Level::Info if record.target() == "operator" => "\u{1F4E2}",
            Level::Info => "\u{1F535}",
            Level::Debug | Level::Trace => "\u{26AA}",
        };
        writeln!(buf, "{emoji} [{}] {}", record.target(), record.args())
    });
    builder.init();
}
