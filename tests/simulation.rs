use diffundere::config::{
    Config, DynamicsCfg, MediaDensity, NetworkCfg, OpinionCfg, OutputCfg, RunCfg,
};
use diffundere::engine::Engine;
use diffundere::model::{Agent, Decision, Interest};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rand_distr::Normal;
use std::{fs, path::PathBuf};

fn base_cfg() -> Config {
    Config {
        opinion: OpinionCfg {
            m_s: -0.2,
            sd_s: 0.1,
            u_s: 0.05,
            m_i: 0.15,
            sd_i: 0.1,
            u_i: 0.01,
        },
        network: NetworkCfg {
            n_agt: 50,
            ratio_ex: 0.0,
            u_s_ex: 0.01,
            media: MediaDensity::Low,
        },
        dynamics: DynamicsCfg {
            omega: 0.5,
            gamma: 0.3,
            mu: 1.0,
            rho: 15,
        },
        run: RunCfg {
            n_steps: 50,
            n_runs: 2,
            rnd_seed: 664,
        },
        output: OutputCfg {
            steps_per_save: 1,
            steps_per_log: 25,
        },
    }
}

/// Configuration under which adoptions actually happen within a few dozen
/// steps: mostly positive opinions, high media coverage, short adoption timer.
fn adopting_cfg() -> Config {
    let mut cfg = base_cfg();
    cfg.opinion.m_s = 0.15;
    cfg.opinion.m_i = 0.2;
    cfg.network.media = MediaDensity::High;
    cfg.dynamics.rho = 5;
    cfg
}

fn tmp_file(name: &str) -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR"));
    fs::create_dir_all(&dir).expect("failed to create tmp dir");
    dir.join(name)
}

#[test]
fn seeded_runs_are_reproducible() {
    let cfg = base_cfg();

    let mut engine_a = Engine::generate_initial_condition(cfg.clone(), 664)
        .expect("failed to generate initial condition");
    let mut engine_b = Engine::generate_initial_condition(cfg, 664)
        .expect("failed to generate initial condition");

    let file_a = tmp_file("reproducible-a.msgpack");
    let file_b = tmp_file("reproducible-b.msgpack");
    engine_a
        .perform_simulation(&file_a)
        .expect("failed to perform simulation");
    engine_b
        .perform_simulation(&file_b)
        .expect("failed to perform simulation");

    assert_eq!(engine_a.history(), engine_b.history());
    assert_eq!(engine_a.state(), engine_b.state());

    let bytes_a = fs::read(&file_a).expect("failed to read trajectory");
    let bytes_b = fs::read(&file_b).expect("failed to read trajectory");
    assert_eq!(bytes_a, bytes_b);
}

#[test]
fn history_has_initial_snapshot_plus_one_entry_per_step() {
    let cfg = base_cfg();
    let n_steps = cfg.run.n_steps;
    let n_agt = cfg.network.n_agt;

    let mut engine = Engine::generate_initial_condition(cfg, 7)
        .expect("failed to generate initial condition");
    assert_eq!(engine.history().len(), 1);

    for _ in 0..n_steps {
        engine.perform_step().expect("failed to perform step");
    }

    assert_eq!(engine.history().len(), n_steps + 1);
    for snapshot in engine.history() {
        assert_eq!(snapshot.len(), n_agt);
    }
}

#[test]
fn decision_states_partition_the_population() {
    let cfg = adopting_cfg();
    let n_agt = cfg.network.n_agt;

    let mut engine = Engine::generate_initial_condition(cfg, 11)
        .expect("failed to generate initial condition");

    for _ in 0..60 {
        engine.perform_step().expect("failed to perform step");

        let mut counts = [0usize; 5];
        for agt in &engine.state().agt_vec {
            let slot = match agt.decision() {
                Decision::NotConcerned => 0,
                Decision::InfoRequest => 1,
                Decision::NoAdoption => 2,
                Decision::PreAdoption => 3,
                Decision::Adoption => 4,
            };
            counts[slot] += 1;
        }
        assert_eq!(counts.iter().sum::<usize>(), n_agt);

        let ratios = engine.ratios();
        for ratio in [ratios.informed, ratios.adopted, ratios.not_concerned] {
            assert!((0.0..=1.0).contains(&ratio));
        }
        assert_eq!(ratios.adopted, counts[4] as f64 / n_agt as f64);
        assert_eq!(ratios.not_concerned, counts[0] as f64 / n_agt as f64);
    }
}

#[test]
fn interest_boundaries_are_strict() {
    // Exactly on the acceptance boundary: global opinion minus uncertainty is
    // zero, which is ambiguous, not clear acceptance.
    let mut agt = Agent::new(0, 0.3, 0.3);
    agt.update_status(0, 15);
    assert_eq!(agt.interest(), Interest::Maybe);
    assert_eq!(agt.decision(), Decision::InfoRequest);

    // Exactly on the rejection boundary.
    let mut agt = Agent::new(1, -0.3, 0.3);
    agt.update_status(0, 15);
    assert_eq!(agt.interest(), Interest::Maybe);
    assert_eq!(agt.decision(), Decision::InfoRequest);

    // Clear acceptance and clear rejection.
    let mut agt = Agent::new(2, 0.4, 0.3);
    agt.update_status(0, 15);
    assert_eq!(agt.interest(), Interest::Yes);
    assert_eq!(agt.decision(), Decision::InfoRequest);

    let mut agt = Agent::new(3, -0.4, 0.3);
    agt.update_status(0, 15);
    assert_eq!(agt.interest(), Interest::No);
    assert_eq!(agt.decision(), Decision::NotConcerned);
}

#[test]
fn adoption_requires_rho_uninterrupted_steps() {
    let mut rng = ChaCha12Rng::seed_from_u64(1);
    let benefit = Normal::new(0.5, 0.0).expect("failed to build distribution");

    let mut agt = Agent::new(0, 0.4, 0.1);
    agt.update_status(0, 3);
    agt.acquire_info(&mut rng, &benefit, 0.01);

    agt.update_status(1, 3);
    assert_eq!(agt.decision(), Decision::PreAdoption);
    assert_eq!(agt.pre_adoption_step(), Some(1));

    agt.update_status(2, 3);
    agt.update_status(3, 3);
    assert_eq!(agt.decision(), Decision::PreAdoption);
    assert_eq!(agt.pre_adoption_step(), Some(1));

    agt.update_status(4, 3);
    assert_eq!(agt.decision(), Decision::Adoption);

    // Terminal: further updates change nothing.
    let frozen = agt.clone();
    agt.update_status(5, 3);
    agt.update_status(100, 3);
    assert_eq!(agt, frozen);
}

#[test]
fn state_machine_invariants_hold_throughout() {
    let cfg = adopting_cfg();

    let mut engine = Engine::generate_initial_condition(cfg, 17)
        .expect("failed to generate initial condition");

    let mut prev_adopted = 0usize;
    for _ in 0..80 {
        engine.perform_step().expect("failed to perform step");

        let mut adopted = 0usize;
        for agt in &engine.state().agt_vec {
            // An ambiguous or rejecting interest always resets the timer.
            if matches!(agt.interest(), Interest::No | Interest::Maybe) {
                assert_eq!(agt.pre_adoption_step(), None);
            }
            // A running timer means the agent is on the adoption track.
            if agt.pre_adoption_step().is_some() {
                assert!(matches!(
                    agt.decision(),
                    Decision::PreAdoption | Decision::Adoption
                ));
            }
            if agt.decision() == Decision::Adoption {
                adopted += 1;
            }
        }

        // Adoption is terminal, so the count never decreases.
        assert!(adopted >= prev_adopted);
        prev_adopted = adopted;
    }

    assert!(prev_adopted > 0, "expected at least one adoption");
}

#[test]
fn adopted_agents_are_frozen() {
    let cfg = adopting_cfg();

    let mut engine = Engine::generate_initial_condition(cfg, 23)
        .expect("failed to generate initial condition");

    for _ in 0..40 {
        engine.perform_step().expect("failed to perform step");
    }

    let adopted: Vec<Agent> = engine
        .state()
        .agt_vec
        .iter()
        .filter(|agt| agt.decision() == Decision::Adoption)
        .cloned()
        .collect();
    assert!(!adopted.is_empty(), "expected at least one adoption");

    for _ in 0..20 {
        engine.perform_step().expect("failed to perform step");
    }

    for frozen in &adopted {
        assert_eq!(&engine.state().agt_vec[frozen.id()], frozen);
    }
}

#[test]
fn fully_decayed_topics_are_dropped() {
    let mut cfg = base_cfg();
    // With a decay rate of one, a topic only reaches neighbors in the step it
    // originated; every surviving queue entry must be from the current step.
    cfg.dynamics.gamma = 1.0;

    let mut engine = Engine::generate_initial_condition(cfg, 31)
        .expect("failed to generate initial condition");

    for _ in 0..30 {
        engine.perform_step().expect("failed to perform step");
        let step = engine.state().step;
        for agt in &engine.state().agt_vec {
            // Adopted agents are frozen with whatever their queue held.
            if agt.decision() == Decision::Adoption {
                continue;
            }
            for &origin in agt.talk_queue() {
                assert_eq!(origin, step);
            }
        }
    }
}

#[test]
fn bounded_confidence_requires_covering_overlap() {
    // The speaker's interval covers the listener's beyond the speaker's own
    // uncertainty: the listener moves toward the speaker.
    let mut agt = Agent::new(0, -0.4, 0.3);
    agt.receive_influence(-0.5, 0.3, 0.5);
    agt.commit_deltas();
    let expected = -0.4 + 0.5 * (0.5 / 0.3 - 1.0) * (-0.5 - (-0.4));
    assert!((agt.soc_op() - expected).abs() < 1e-12);
    // Equal uncertainties leave the uncertainty untouched.
    assert!((agt.soc_unc() - 0.3).abs() < 1e-12);

    // Disjoint intervals: no influence at all.
    let mut agt = Agent::new(1, 0.5, 0.1);
    agt.receive_influence(-0.5, 0.1, 1.0);
    agt.commit_deltas();
    assert_eq!(agt.soc_op(), 0.5);
    assert_eq!(agt.soc_unc(), 0.1);

    // Overlap exactly equal to the speaker's uncertainty: strictly not enough.
    let mut agt = Agent::new(2, 0.0, 0.1);
    agt.receive_influence(0.1, 0.1, 1.0);
    agt.commit_deltas();
    assert_eq!(agt.soc_op(), 0.0);
    assert_eq!(agt.soc_unc(), 0.1);
}

#[test]
fn invalid_configs_are_rejected() {
    let valid = r#"
[opinion]
m_s = -0.2
sd_s = 0.1
u_s = 0.05
m_i = 0.15
sd_i = 0.1
u_i = 0.01

[network]
n_agt = 50
ratio_ex = 0.0
u_s_ex = 0.01
media = "low"

[dynamics]
omega = 0.5
gamma = 0.3
mu = 1.0
rho = 15

[run]
n_steps = 50
n_runs = 2
rnd_seed = 664

[output]
steps_per_save = 1
steps_per_log = 25
"#;

    fn load(name: &str, contents: &str) -> anyhow::Result<Config> {
        let path = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);
        fs::write(&path, contents).expect("failed to write config");
        Config::from_file(&path)
    }

    assert!(load("cfg-valid.toml", valid).is_ok());

    // Unrecognized media mode must be rejected, never defaulted.
    let unknown_media = valid.replace("media = \"low\"", "media = \"medium\"");
    assert!(load("cfg-media.toml", &unknown_media).is_err());

    // Missing required field.
    let missing_seed = valid.replace("rnd_seed = 664", "");
    assert!(load("cfg-missing.toml", &missing_seed).is_err());

    // Out-of-range probability.
    let bad_omega = valid.replace("omega = 0.5", "omega = 1.5");
    assert!(load("cfg-range.toml", &bad_omega).is_err());
}
