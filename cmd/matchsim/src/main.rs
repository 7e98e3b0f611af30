//! matchsim - Simulation harness for the face match-group engine.
//!
//! Seeds an in-memory store with clustered face history for a number of
//! organizations, submits freshly detected persons through the matcher,
//! and reports how they settled: joined a seeded cluster or opened a new
//! match group.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use facematch_embedding::{Embedding, DIM};
use facematch_matcher::{Matcher, MatcherConfig};
use facematch_store::{Face, MatchGroupId, MemoryStore, OrgId, Person, Rect};

/// Simulation harness for the face match-group engine.
#[derive(Parser, Debug)]
#[command(name = "matchsim")]
#[command(about = "Simulate face clustering across organizations")]
struct Args {
    /// Number of organizations to simulate
    #[arg(long, default_value_t = 2)]
    orgs: i64,

    /// Seeded clusters (existing match groups) per organization
    #[arg(long, default_value_t = 8)]
    groups: usize,

    /// New persons to submit per organization
    #[arg(long, default_value_t = 24)]
    persons: usize,

    /// Faces captured for each new person
    #[arg(long, default_value_t = 3)]
    faces: usize,

    /// Fraction of new persons drawn near an existing cluster
    #[arg(long, default_value_t = 0.5)]
    match_rate: f32,

    /// RNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Matcher config file (YAML); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Deterministic 64-bit LCG, good enough for synthetic embeddings.
struct Lcg(u64);

impl Lcg {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.0
    }

    /// Uniform in roughly [-0.5, 0.5).
    fn next_f32(&mut self) -> f32 {
        ((self.next_u64() >> 33) as f32) / (u32::MAX as f32) - 0.5
    }

    fn center(&mut self) -> [f32; DIM] {
        let mut v = [0.0f32; DIM];
        for x in v.iter_mut() {
            *x = self.next_f32() * 10.0;
        }
        v
    }

    /// A face embedding jittered around a cluster center. The jitter is
    /// small enough that same-cluster faces stay well inside the default
    /// squared-distance threshold.
    fn near(&mut self, center: &[f32; DIM]) -> Embedding {
        let mut v = *center;
        for x in v.iter_mut() {
            *x += self.next_f32() * 0.04;
        }
        Embedding::from(v)
    }
}

/// One seeded cluster: its match group and embedding center.
struct Cluster {
    group: MatchGroupId,
    center: [f32; DIM],
}

/// A submitted person and the cluster it was drawn from, if any.
struct Submission {
    person_id: String,
    org_id: OrgId,
    expected: Option<MatchGroupId>,
}

fn cam_of_org(org_id: OrgId) -> i64 {
    100 + org_id
}

fn make_person(id: &str, org_id: OrgId, match_group: MatchGroupId) -> Person {
    Person {
        id: id.to_string(),
        cam_id: cam_of_org(org_id),
        last_seen_at: Utc::now(),
        profile_id: match_group,
        picture_id: 1,
        match_group,
    }
}

fn make_face(person_id: &str, seq: i64, embedding: Embedding) -> Face {
    Face {
        person_id: person_id.to_string(),
        captured_at: Utc::now() + chrono::Duration::milliseconds(seq),
        image_id: seq,
        rect: Rect::default(),
        face_image_id: seq,
        embedding,
    }
}

/// Seeds cameras, clustered persons, and their faces. Returns the
/// clusters per organization.
fn seed_store(store: &MemoryStore, args: &Args, rng: &mut Lcg) -> Vec<Vec<Cluster>> {
    let mut next_group: MatchGroupId = 0;
    let mut orgs = Vec::new();
    for org_id in 1..=args.orgs {
        store.add_camera(cam_of_org(org_id), org_id);
        let mut clusters = Vec::new();
        for _ in 0..args.groups {
            next_group += 1;
            let center = rng.center();
            let person_id = format!("org{org_id}-seed{next_group}");
            store.add_person(make_person(&person_id, org_id, next_group));
            for seq in 0..2 {
                store.add_face(make_face(&person_id, seq, rng.near(&center)));
            }
            clusters.push(Cluster {
                group: next_group,
                center,
            });
        }
        orgs.push(clusters);
    }
    orgs
}

/// Submits new persons through the matcher and records what each one was
/// expected to settle as.
async fn submit_all(
    matcher: &Matcher,
    store: &MemoryStore,
    args: &Args,
    clusters: &[Vec<Cluster>],
    rng: &mut Lcg,
) -> Vec<Submission> {
    let mut submissions = Vec::new();
    for org_id in 1..=args.orgs {
        let org_clusters = &clusters[(org_id - 1) as usize];
        for i in 0..args.persons {
            let person_id = format!("org{org_id}-p{i}");
            let draw = rng.next_f32() + 0.5;
            let expected = if draw < args.match_rate && !org_clusters.is_empty() {
                let pick = (rng.next_u64() % org_clusters.len() as u64) as usize;
                Some(pick)
            } else {
                None
            };

            let fresh_center;
            let center = match expected {
                Some(pick) => &org_clusters[pick].center,
                None => {
                    fresh_center = rng.center();
                    &fresh_center
                }
            };

            let person = make_person(&person_id, org_id, 0);
            let faces: Vec<Face> = (0..args.faces)
                .map(|seq| make_face(&person_id, seq as i64, rng.near(center)))
                .collect();

            // The store carries the detection rows before the matcher
            // hears about them, mirroring the ingest pipeline.
            store.add_person(person.clone());
            for face in &faces {
                store.add_face(face.clone());
            }

            matcher
                .on_new_faces(cam_of_org(org_id), vec![person], faces)
                .await;

            submissions.push(Submission {
                person_id,
                org_id,
                expected: expected.map(|pick| org_clusters[pick].group),
            });
        }
    }
    submissions
}

/// Polls until every submitted person has a match group, or gives up.
async fn wait_settled(store: &MemoryStore, submissions: &[Submission]) -> Result<()> {
    for _ in 0..200 {
        let all_settled = submissions.iter().all(|s| {
            store
                .person(&s.person_id)
                .map(|p| !p.is_orphan())
                .unwrap_or(false)
        });
        if all_settled {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("persons did not settle within 10s");
}

fn load_config(path: &Option<PathBuf>) -> Result<MatcherConfig> {
    match path {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str(&data).context("parsing matcher config")
        }
        None => Ok(MatcherConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_target(false)
            .init();
    }

    let cfg = load_config(&args.config)?;
    let mut rng = Lcg(args.seed);

    let store = Arc::new(MemoryStore::new());
    let clusters = seed_store(&store, &args, &mut rng);

    println!(
        "=== Seeded {} orgs x {} clusters ===",
        args.orgs, args.groups
    );

    let matcher = Matcher::new(store.clone(), cfg);
    let submissions = submit_all(&matcher, &store, &args, &clusters, &mut rng).await;
    wait_settled(&store, &submissions).await?;

    let mut joined = 0usize;
    let mut opened = 0usize;
    let mut mismatched = 0usize;
    for s in &submissions {
        let person = store
            .person(&s.person_id)
            .context("submitted person vanished")?;
        let got = person.match_group;
        match s.expected {
            Some(want) if got == want => joined += 1,
            Some(want) => {
                mismatched += 1;
                println!(
                    "  MISMATCH org{} {}: expected group {}, got {}",
                    s.org_id, s.person_id, want, got
                );
            }
            None => opened += 1,
        }
        if args.verbose {
            println!("  org{} {} -> group {}", s.org_id, s.person_id, got);
        }
    }

    let new_profiles = store.profile_count();
    println!("\n=== Results ===");
    println!("  submitted:     {}", submissions.len());
    println!("  joined seeded: {joined}");
    println!("  new groups:    {opened} ({new_profiles} profiles created)");
    println!("  mismatched:    {mismatched}");
    println!("  active workers after settle: {}", matcher.active_workers());

    matcher.shutdown();

    if mismatched > 0 {
        anyhow::bail!("{mismatched} persons settled into an unexpected group");
    }
    Ok(())
}
