use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use market_clock::{Clock, ClockDriver, ClockState, ClockStore, DriverConfig};
use sim_store::SimDb;
use synthetic_market::{GeneratorConfig, MarketSimulator};
use tokio::signal::unix::SignalKind;
use tokio::time;

mod config;

use config::AgentConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting synthetic market simulator");

    // 2. Configuration
    let config = AgentConfig::from_env()?;
    let generator_config = GeneratorConfig::from_env();
    tracing::info!("Configuration loaded");
    tracing::info!("  Database: {}", config.database_url);
    tracing::info!(
        "  Clock: {} at {}x, tick {}ms",
        config.clock_mode,
        config.clock_speed,
        config.clock_tick_ms
    );
    tracing::info!("  Watchlist: {}", config.watchlist.join(", "));
    tracing::info!(
        "  Reports: {} x {}m bars every {}s",
        config.report_bars,
        config.report_timeframe_minutes,
        config.report_interval_seconds
    );

    // 3. State store
    let db = Arc::new(
        SimDb::new(&config.database_url)
            .await
            .with_context(|| {
                format!("Failed to open simulator database at {}", config.database_url)
            })?,
    );

    // 4. Clock: restore or seed from config
    let (clock, restored) = match db.load_clock().await {
        Ok(Some(state)) => {
            tracing::info!(
                "Restored clock: {} at {} ({}x, {})",
                state.mode,
                state.simulated_time.to_rfc3339(),
                state.speed,
                if state.running { "running" } else { "paused" }
            );
            (Clock::from_state(state), true)
        }
        Ok(None) => (fresh_clock(&config), false),
        Err(e) => {
            tracing::warn!("Could not restore clock state, starting fresh: {}", e);
            (fresh_clock(&config), false)
        }
    };

    // 5. Simulator and scenario
    let simulator = MarketSimulator::new(clock.clone(), generator_config).with_store(db.clone());
    let scenario_restored = match simulator.restore().await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Could not restore scenario, ignoring: {}", e);
            false
        }
    };
    if !scenario_restored {
        if let Some(preset) = &config.scenario_preset {
            simulator
                .set_preset(preset)
                .await
                .with_context(|| format!("SCENARIO_PRESET '{}' is not a known preset", preset))?;
        }
    }

    // 6. Clock driver; a restored clock keeps its running flag
    let store: Arc<dyn ClockStore> = db.clone();
    let driver = ClockDriver::spawn(
        clock,
        Some(store),
        DriverConfig {
            tick: Duration::from_millis(config.clock_tick_ms),
            persist_every_ticks: config.clock_persist_every,
        },
    );
    if !restored && config.clock_autostart {
        driver.start();
    }

    // 7. Report loop with graceful shutdown (SIGINT + SIGTERM)
    let mut interval = time::interval(Duration::from_secs(config.report_interval_seconds));
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                report_watchlist(&simulator, &config);
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    driver.shutdown().await;
    tracing::info!("Simulator stopped at {}", simulator.current_time().0.to_rfc3339());
    Ok(())
}

fn fresh_clock(config: &AgentConfig) -> Clock {
    let mut state = ClockState::new(config.clock_mode, config.sim_start);
    state.speed = config.clock_speed;
    tracing::info!(
        "New {} clock starting at {} ({}x)",
        state.mode,
        state.sim_start.to_rfc3339(),
        state.speed
    );
    Clock::from_state(state)
}

/// Log the live bar and regime for every watchlist symbol.
fn report_watchlist(simulator: &MarketSimulator, config: &AgentConfig) {
    let (now, mode) = simulator.current_time();
    let slot = simulator.scenario();
    tracing::info!(
        "{} ({}) | scenario: {}",
        now.to_rfc3339(),
        mode,
        slot.effective()
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| "baseline".to_string())
    );

    for symbol in &config.watchlist {
        let bars = simulator.generate_bars(
            symbol,
            config.report_timeframe_minutes,
            config.report_bars,
            None,
        );
        let (Some(first), Some(live)) = (bars.first(), bars.last()) else {
            continue;
        };
        let change = if first.open > 0.0 {
            (live.close / first.open - 1.0) * 100.0
        } else {
            0.0
        };
        let regime = simulator.regime_at(symbol, config.report_timeframe_minutes, None);

        tracing::info!(
            "  {:<6} O {:.2} H {:.2} L {:.2} C {:.2} V {} | {:+.2}% over {} bars | {}",
            symbol,
            live.open,
            live.high,
            live.low,
            live.close,
            live.volume,
            change,
            bars.len(),
            regime.regime
        );
    }
}
