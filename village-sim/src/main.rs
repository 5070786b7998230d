//! Headless village simulation.
//!
//! Drives the orchestrator over a synthetic population, fires random
//! emotional events, then asks the dialogue pipeline for a few lines and
//! prints both analytics snapshots as JSON.
//!
//! ```bash
//! cargo run -p village-sim -- --agents 200 --ticks 100
//! ```
//!
//! A generation provider is picked up from the environment
//! (`VILLAGE_AI_LLM_PROVIDER`, `ANTHROPIC_API_KEY`, ...). Without one a canned
//! mock provider answers instead.

use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use village_ai::prelude::*;
use village_ai::dialogue::{TimeOfDay, Weather};
use village_ai::testing::{MockProvider, MockWorld};

/// Command line options.
#[derive(Debug)]
struct SimOptions {
    agents: usize,
    ticks: u64,
    events_per_tick: usize,
    dialogue_lines: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            agents: 100,
            ticks: 60,
            events_per_tick: 3,
            dialogue_lines: 6,
        }
    }
}

fn parse_options(args: &[String]) -> SimOptions {
    let mut options = SimOptions::default();
    if let Some(ticks) = std::env::var("SIM_TICKS").ok().and_then(|v| v.parse().ok()) {
        options.ticks = ticks;
    }

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let value = iter.clone().next().and_then(|v| v.parse::<u64>().ok());
        match (arg.as_str(), value) {
            ("--agents", Some(v)) => options.agents = v as usize,
            ("--ticks", Some(v)) => options.ticks = v,
            ("--events", Some(v)) => options.events_per_tick = v as usize,
            ("--lines", Some(v)) => options.dialogue_lines = v as usize,
            (other, _) => {
                if other.starts_with("--") {
                    warn!(flag = other, "ignoring unrecognised or incomplete flag");
                }
                continue;
            }
        }
        iter.next();
    }
    options
}

fn print_help() {
    println!("village-sim: headless village AI simulation");
    println!();
    println!("Options:");
    println!("  --agents <n>  Population size (default 100)");
    println!("  --ticks <n>   Ticks to run (default 60, or SIM_TICKS)");
    println!("  --events <n>  Random emotional events per tick (default 3)");
    println!("  --lines <n>   Dialogue lines to generate (default 6)");
}

const EVENTS: [fn() -> EmotionalEvent; 10] = [
    EmotionalEvent::successful_trade,
    EmotionalEvent::player_interaction,
    EmotionalEvent::death_nearby,
    EmotionalEvent::marriage,
    EmotionalEvent::birth,
    EmotionalEvent::raid,
    EmotionalEvent::lonely,
    EmotionalEvent::repetitive_task,
    EmotionalEvent::discovery,
    EmotionalEvent::argument,
];

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    let options = parse_options(&args);

    let orchestrator_config = OrchestratorConfig::from_env()?;
    let dialogue_config = DialogueConfig::from_env()?;
    info!(
        agents = options.agents,
        ticks = options.ticks,
        workers = orchestrator_config.worker_threads,
        dialogue_enabled = dialogue_config.enabled,
        "configuration loaded"
    );

    let world = Arc::new(MockWorld::new());
    let annotations = Arc::new(AnnotationScheduler::new(world.clone()));
    let emotions = Arc::new(EmotionSubsystem::new(
        EmotionConfig::default(),
        world.clone(),
        annotations.clone(),
    ));
    let orchestrator = Orchestrator::builder(orchestrator_config)
        .lookup(world.clone())
        .spatial(world.clone())
        .annotations(annotations)
        .subsystem(emotions.clone())
        .build()?;

    let ids = populate(&world, options.agents);
    for id in &ids {
        orchestrator.register_agent(*id).await?;
    }
    orchestrator.start().await?;

    let mut rng = rand::thread_rng();
    for tick in 1..=options.ticks {
        for _ in 0..options.events_per_tick {
            let Some(id) = ids.choose(&mut rng) else { break };
            let Some(profile) = world.profile(*id) else { continue };
            let event = EVENTS[rng.gen_range(0..EVENTS.len())]();
            emotions.process_event(&profile, event);
        }
        let report = orchestrator.tick(tick).await?;
        if report.over_budget {
            warn!(tick, elapsed_ms = report.elapsed.as_millis() as u64, "tick over budget");
        }
    }
    let maintenance = orchestrator.maintain().await;
    info!(reaped = maintenance.reaped, "maintenance pass finished");

    let dialogue = Arc::new(DialogueOrchestrator::new(dialogue_config)?.with_notice_sink(world.clone()));
    let configured = match GenerationConfig::from_env() {
        Ok(config) => create_provider(&config).unwrap_or_else(|e| {
            warn!(error = %e, "generation provider unavailable");
            None
        }),
        Err(e) => {
            warn!(error = %e, "generation config rejected");
            None
        }
    };
    match configured {
        Some(provider) => {
            info!(provider = provider.name(), "using configured generation provider");
            dialogue.set_provider(Some(provider)).await;
        }
        None => {
            info!("no generation provider configured, using canned replies");
            let mock: Arc<dyn GenerationProvider> =
                Arc::new(MockProvider::replying("Well met, traveller. The fields are quiet today."));
            dialogue.set_provider(Some(mock)).await;
        }
    }
    dialogue.start_background().await;

    let player = PlayerId::new();
    let mut pending = Vec::new();
    for _ in 0..options.dialogue_lines {
        let Some(id) = ids.choose(&mut rng) else { break };
        let Some(profile) = world.profile(*id) else { continue };
        let mut context = DialogueContext::new(profile, player, "Steve")
            .with_reputation(rng.gen_range(-40..80))
            .with_happiness(rng.gen_range(0..=100))
            .with_time_of_day(TimeOfDay::from_ticks(rng.gen_range(0..24_000)))
            .with_weather(*[Weather::Clear, Weather::Rain, Weather::Thunder, Weather::Snow]
                .choose(&mut rng)
                .unwrap_or(&Weather::Clear));
        if let Some(mood) = emotions.state_of(*id) {
            context = context.with_dominant_emotion(mood.dominant_emotion());
        }
        let category = *DialogueCategory::ALL.choose(&mut rng).unwrap_or(&DialogueCategory::Greeting);
        pending.push((category, dialogue.spawn_generate(context, category)));
    }
    for (category, handle) in pending {
        match handle.await {
            Ok(response) => match response.text() {
                Some(text) => println!("[{category}] {text}"),
                None => println!("[{category}] <no dialogue: {response:?}>"),
            },
            Err(e) => warn!(error = %e, "dialogue task failed"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&orchestrator.refresh_analytics())?);
    println!("{}", serde_json::to_string_pretty(&dialogue.analytics().await)?);
    for (title, message) in world.notices() {
        println!("notice: {title}: {message}");
    }

    dialogue.shutdown().await;
    orchestrator.shutdown().await;
    Ok(())
}

/// Spawn `count` agents with random personalities and wire up neighbours.
fn populate(world: &MockWorld, count: usize) -> Vec<AgentId> {
    const PERSONALITIES: [Personality; 11] = [
        Personality::Friendly,
        Personality::Grumpy,
        Personality::Shy,
        Personality::Energetic,
        Personality::Lazy,
        Personality::Curious,
        Personality::Serious,
        Personality::Cheerful,
        Personality::Nervous,
        Personality::Confident,
        Personality::Neutral,
    ];
    let mut rng = rand::thread_rng();
    let ids: Vec<AgentId> = (0..count)
        .map(|i| {
            let personality = PERSONALITIES[rng.gen_range(0..PERSONALITIES.len())];
            world.spawn(&format!("Villager {i}"), personality)
        })
        .collect();

    for (i, id) in ids.iter().enumerate() {
        let neighbours: Vec<AgentId> = ids.iter().skip(i + 1).take(3).copied().collect();
        world.place_near(*id, &neighbours);
        if rng.gen_bool(0.2) {
            world.set_low_priority(*id, true);
        }
    }
    ids
}
