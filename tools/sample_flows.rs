//! Sample Flow Generator
//!
//! Writes a synthetic flows CSV, a reference CSV with observed durations and
//! a toy pipeline artifact, for trying the scorer end to end.

use clap::Parser;
use flow_duration_scoring::models::pipeline::{
    Estimator, FeatureSpec, PipelineArtifact, Tree, TreeNode, PIPELINE_FORMAT_VERSION,
};
use rand::Rng;
use std::path::PathBuf;
use tracing::info;

const SERVICES: [&str; 5] = ["http", "dns", "mqtt", "ssl", "-"];
const PROTOS: [&str; 2] = ["tcp", "udp"];

#[derive(Parser)]
#[command(name = "sample-flows")]
#[command(about = "Generate sample flows, reference data and a toy pipeline artifact")]
struct Args {
    /// Output directory
    #[arg(long, default_value = "sample")]
    out_dir: PathBuf,

    /// Number of flows to score
    #[arg(long, default_value = "100")]
    count: usize,

    /// Number of reference (historical) flows
    #[arg(long, default_value = "1000")]
    reference_count: usize,

    /// Fraction of flows generated as long-running outliers
    #[arg(long, default_value = "0.1")]
    outlier_rate: f64,
}

/// One synthetic flow
struct Flow {
    proto: &'static str,
    service: &'static str,
    fwd_pkts_tot: u32,
    fwd_iat_min: f64,
    bwd_pkts_payload_avg: f64,
    flow_duration: f64,
}

/// Flow generator for testing
struct FlowGenerator {
    rng: rand::rngs::ThreadRng,
}

impl FlowGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    /// Generate an ordinary flow
    fn generate_normal(&mut self) -> Flow {
        let service = self.random_choice(&SERVICES);
        let fwd_pkts_tot = self.rng.gen_range(1..200);
        Flow {
            proto: if service == "dns" { "udp" } else { self.random_choice(&PROTOS) },
            service,
            fwd_pkts_tot,
            fwd_iat_min: self.rng.gen_range(0.0..50.0),
            bwd_pkts_payload_avg: self.rng.gen_range(0.0..300.0),
            flow_duration: fwd_pkts_tot as f64 * self.rng.gen_range(0.001..0.05),
        }
    }

    /// Generate a long-running flow
    fn generate_outlier(&mut self) -> Flow {
        let mut flow = self.generate_normal();
        flow.fwd_pkts_tot = self.rng.gen_range(500..5000);
        flow.fwd_iat_min = self.rng.gen_range(100.0..1000.0);
        flow.flow_duration = self.rng.gen_range(30.0..600.0);
        flow
    }

    fn random_choice(&mut self, choices: &[&'static str]) -> &'static str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

/// Log-space model: more packets and slower inter-arrival -> longer flows
fn toy_pipeline() -> PipelineArtifact {
    PipelineArtifact {
        format_version: PIPELINE_FORMAT_VERSION,
        name: Some("toy_gbr".to_string()),
        features: vec![
            FeatureSpec::Categorical {
                name: "proto".to_string(),
                categories: PROTOS.iter().map(|s| s.to_string()).collect(),
            },
            FeatureSpec::Numeric {
                name: "fwd_pkts_tot".to_string(),
                center: 100.0,
                scale: 100.0,
                impute: Some(100.0),
            },
            FeatureSpec::Numeric {
                name: "fwd_iat_min".to_string(),
                center: 25.0,
                scale: 25.0,
                impute: Some(25.0),
            },
        ],
        estimator: Estimator::GradientBoosting {
            init: 0.8,
            learning_rate: 0.5,
            trees: vec![
                // encoded slots: [tcp, udp, fwd_pkts_tot, fwd_iat_min]
                Tree {
                    nodes: vec![
                        TreeNode::Split {
                            feature: 2,
                            threshold: 1.0,
                            left: 1,
                            right: 2,
                        },
                        TreeNode::Leaf { value: -0.2 },
                        TreeNode::Leaf { value: 2.5 },
                    ],
                },
                Tree {
                    nodes: vec![
                        TreeNode::Split {
                            feature: 3,
                            threshold: 2.0,
                            left: 1,
                            right: 2,
                        },
                        TreeNode::Split {
                            feature: 1,
                            threshold: 0.5,
                            left: 3,
                            right: 4,
                        },
                        TreeNode::Leaf { value: 3.0 },
                        TreeNode::Leaf { value: 0.1 },
                        TreeNode::Leaf { value: -0.4 },
                    ],
                },
            ],
        },
    }
}

fn write_flows(path: &std::path::Path, flows: &[Flow], with_target: bool) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec![
        "proto",
        "service",
        "fwd_pkts_tot",
        "fwd_iat_min",
        "bwd_pkts_payload_avg",
    ];
    if with_target {
        header.push("flow_duration");
    }
    writer.write_record(&header)?;

    for flow in flows {
        let mut record = vec![
            flow.proto.to_string(),
            flow.service.to_string(),
            flow.fwd_pkts_tot.to_string(),
            format!("{:.3}", flow.fwd_iat_min),
            format!("{:.3}", flow.bwd_pkts_payload_avg),
        ];
        if with_target {
            record.push(format!("{:.6}", flow.flow_duration));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sample_flows=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!(
        out_dir = %args.out_dir.display(),
        count = args.count,
        reference_count = args.reference_count,
        outlier_rate = args.outlier_rate,
        "Generating sample data"
    );

    std::fs::create_dir_all(&args.out_dir)?;
    let mut generator = FlowGenerator::new();
    let mut rng = rand::thread_rng();

    let outlier_rate = args.outlier_rate.clamp(0.0, 1.0);
    let mut outliers = 0;
    let flows: Vec<Flow> = (0..args.count)
        .map(|_| {
            if rng.gen_bool(outlier_rate) {
                outliers += 1;
                generator.generate_outlier()
            } else {
                generator.generate_normal()
            }
        })
        .collect();
    let reference: Vec<Flow> = (0..args.reference_count)
        .map(|_| generator.generate_normal())
        .collect();

    let flows_path = args.out_dir.join("flows.csv");
    let reference_path = args.out_dir.join("reference.csv");
    let artifact_path = args.out_dir.join("flow_duration_pipeline.json");

    write_flows(&flows_path, &flows, false)?;
    write_flows(&reference_path, &reference, true)?;
    std::fs::write(&artifact_path, serde_json::to_string_pretty(&toy_pipeline())?)?;

    info!(
        flows = %flows_path.display(),
        reference = %reference_path.display(),
        artifact = %artifact_path.display(),
        outliers = outliers,
        "Completed! Try: flow-score --model-path {} --input-csv {} --reference-csv {}",
        artifact_path.display(),
        flows_path.display(),
        reference_path.display()
    );

    Ok(())
}
