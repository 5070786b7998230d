//! Scheduling properties of the orchestrator over larger populations.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use village_ai::annotation::AnnotationScheduler;
use village_ai::config::{EmotionConfig, OrchestratorConfig};
use village_ai::emotion::{EmotionSubsystem, EmotionType, EmotionalEvent};
use village_ai::host::Personality;
use village_ai::id::AgentId;
use village_ai::orchestrator::Orchestrator;
use village_ai::testing::{MockWorld, RecordingAnnotations, RecordingSubsystem};

async fn populated(
    world: &Arc<MockWorld>,
    config: OrchestratorConfig,
    count: usize,
) -> (Orchestrator, Arc<RecordingSubsystem>, Vec<AgentId>) {
    let recorder = Arc::new(RecordingSubsystem::new("planning", Duration::ZERO));
    let orchestrator = Orchestrator::builder(config)
        .lookup(world.clone())
        .spatial(world.clone())
        .subsystem(recorder.clone())
        .build()
        .unwrap();
    let ids = world.populate(count);
    for id in &ids {
        orchestrator.register_agent(*id).await.unwrap();
    }
    (orchestrator, recorder, ids)
}

#[tokio::test]
async fn test_every_agent_visited_within_ceil_n_over_k_ticks() {
    let world = Arc::new(MockWorld::new());
    let (orchestrator, recorder, ids) = populated(&world, OrchestratorConfig::default(), 95).await;

    // 95 / 20 = 4 agents per tick
    let window = 4;
    let ticks = ids.len().div_ceil(window) as u64;
    for tick in 1..=ticks {
        let report = orchestrator.tick(tick).await.unwrap();
        assert_eq!(report.visited.len(), window);
    }
    for id in &ids {
        assert!(recorder.updates_for(*id) >= 1, "{id} was never updated");
    }
}

#[tokio::test]
async fn test_window_never_exceeds_ceiling() {
    let world = Arc::new(MockWorld::new());
    let config = OrchestratorConfig::default().with_updates_per_tick(1, 25);
    let (orchestrator, recorder, _) = populated(&world, config, 2_000).await;

    for tick in 1..=10 {
        let report = orchestrator.tick(tick).await.unwrap();
        assert_eq!(report.population, 2_000);
        assert!(report.visited.len() <= 25);
        assert!(report.updated <= 25);
    }
    assert_eq!(recorder.updates(), 250);
}

#[tokio::test]
async fn test_thousand_agents_each_updated_once_in_twenty_ticks() {
    let world = Arc::new(MockWorld::new());
    let (orchestrator, recorder, ids) = populated(&world, OrchestratorConfig::default(), 1_000).await;

    let mut visits: HashMap<AgentId, usize> = HashMap::new();
    for tick in 1..=20 {
        let report = orchestrator.tick(tick).await.unwrap();
        assert_eq!(report.visited.len(), 50);
        assert!(!report.over_budget, "tick {tick} took {:?}", report.elapsed);
        for id in report.visited {
            *visits.entry(id).or_default() += 1;
        }
    }
    assert_eq!(visits.len(), 1_000);
    assert!(visits.values().all(|count| *count == 1));
    assert!(ids.iter().all(|id| recorder.updates_for(*id) == 1));

    let analytics = orchestrator.refresh_analytics();
    assert_eq!(analytics.ticks, 20);
    assert_eq!(analytics.total_updates, 1_000);
    assert_eq!(analytics.over_budget_ticks, 0);
}

#[tokio::test]
async fn test_low_priority_population_is_throttled_not_starved() {
    let world = Arc::new(MockWorld::new());
    let (orchestrator, recorder, ids) = populated(&world, OrchestratorConfig::default(), 1_000).await;
    for id in &ids {
        world.set_low_priority(*id, true);
    }

    // 20 ticks per full rotation, so 100 ticks visit everyone five times
    let mut skipped = 0;
    for tick in 1..=100 {
        let report = orchestrator.tick(tick).await.unwrap();
        skipped += report.skipped_low_priority;
    }
    let starved = ids.iter().filter(|id| recorder.updates_for(**id) == 0).count();
    assert_eq!(starved, 0, "{starved} low-priority agents never ran");
    assert!(ids.iter().all(|id| recorder.updates_for(*id) == 1));
    assert_eq!(skipped, 4_000);

    let report = orchestrator.maintain().await;
    assert_eq!(report.reaped, 0);
    assert_eq!(orchestrator.agent_count(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn test_idle_agents_reaped_by_maintenance() {
    let world = Arc::new(MockWorld::new());
    let config = OrchestratorConfig::default().with_stale_threshold(Duration::from_secs(60));
    let (orchestrator, recorder, ids) = populated(&world, config, 2).await;
    let (busy, idle) = (ids[0], ids[1]);
    orchestrator.set_active(idle, false);

    tokio::time::advance(Duration::from_secs(61)).await;
    for tick in 1..=2 {
        orchestrator.tick(tick).await.unwrap();
    }

    let report = orchestrator.maintain().await;
    assert!(report.ran);
    assert_eq!(report.reaped, 1);
    assert!(orchestrator.is_registered(busy));
    assert!(!orchestrator.is_registered(idle));
    assert_eq!(recorder.cleaned_up(), 1);
    assert_eq!(recorder.maintained(), 1);
}

#[tokio::test]
async fn test_unregister_runs_cleanup() {
    let world = Arc::new(MockWorld::new());
    let (orchestrator, recorder, ids) = populated(&world, OrchestratorConfig::default(), 3).await;

    assert!(orchestrator.unregister_agent(ids[0]).await);
    assert!(!orchestrator.unregister_agent(ids[0]).await);
    assert_eq!(orchestrator.agent_count(), 2);
    assert_eq!(recorder.cleaned_up(), 1);
}

#[tokio::test]
async fn test_emotion_subsystem_publishes_mood() {
    let world = Arc::new(MockWorld::new());
    let sink = Arc::new(RecordingAnnotations::default());
    let annotations = Arc::new(AnnotationScheduler::new(sink.clone()));
    let emotions = Arc::new(EmotionSubsystem::new(
        EmotionConfig::default(),
        world.clone(),
        annotations.clone(),
    ));
    let orchestrator = Orchestrator::builder(OrchestratorConfig::default())
        .lookup(world.clone())
        .spatial(world.clone())
        .annotations(annotations)
        .subsystem(emotions.clone())
        .build()
        .unwrap();

    let id = world.spawn("Mira", Personality::Nervous);
    orchestrator.register_agent(id).await.unwrap();
    let profile = world.profile(id).unwrap();
    emotions.process_event(&profile, EmotionalEvent::raid());

    orchestrator.tick(1).await.unwrap();
    let context = orchestrator.agent_context(id).unwrap();
    assert_eq!(
        context.get(EmotionSubsystem::CONTEXT_DOMINANT),
        Some(json!(EmotionType::Fear))
    );

    orchestrator.unregister_agent(id).await;
    assert!(emotions.state_of(id).is_none());
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reaped_agent_never_gets_a_name_revert() {
    let world = Arc::new(MockWorld::new());
    let sink = Arc::new(RecordingAnnotations::default());
    let annotations = Arc::new(AnnotationScheduler::new(sink.clone()));
    let emotions = Arc::new(EmotionSubsystem::new(
        EmotionConfig::default(),
        world.clone(),
        annotations.clone(),
    ));
    let orchestrator = Orchestrator::builder(OrchestratorConfig::default())
        .lookup(world.clone())
        .spatial(world.clone())
        .annotations(annotations.clone())
        .subsystem(emotions.clone())
        .build()
        .unwrap();

    let id = world.spawn("Odo", Personality::Grumpy);
    orchestrator.register_agent(id).await.unwrap();
    let profile = world.profile(id).unwrap();
    orchestrator.unregister_agent(id).await;

    assert!(emotions.process_event(&profile, EmotionalEvent::argument()).is_none());
    assert!(emotions.state_of(id).is_none());
    assert_eq!(annotations.pending(), 0);

    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(annotations.sweep(), 0);
    assert_eq!(sink.writes(), 0);
}
