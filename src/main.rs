use std::{path::PathBuf, process};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use autorig::{
    logging::{LogLevel, init_logging},
    rig::{RigOptions, preset::PresetLibrary, rig_character},
    settings::{RigSettings, load_settings},
    stress::{
        StressTestOptions,
        pose::{ALL_POSES, load_pose_library, standard_pose_library},
        run_stress_test,
    },
};

/// Automatic humanoid rigging and stress-pose validation
#[derive(Parser)]
#[command(name = "autorig")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Repair a mesh, build a skeleton, bind weights and export the rig
    Rig(RigArgs),

    /// Pose a rigged character into stress poses and render each one
    Stress(StressArgs),

    /// List character presets and their aliases
    Presets(PresetsArgs),

    /// List the stress pose library
    Poses(PosesArgs),
}

#[derive(Args)]
struct RigArgs {
    /// Input mesh (.glb, .gltf, .ply, .obj)
    input: PathBuf,

    /// Output rig (.glb, .gltf) or mesh-only (.ply, .obj)
    output: PathBuf,

    /// Character name; selects the proportion preset
    #[arg(short, long, default_value = "default")]
    character: String,

    /// Settings JSON file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Extra character presets JSON file
    #[arg(long)]
    presets: Option<PathBuf>,

    /// Skip writing the .autorig.json project next to the output
    #[arg(long)]
    no_project: bool,

    /// Write a markdown review checklist to this path
    #[arg(long)]
    checklist: Option<PathBuf>,
}

#[derive(Args)]
struct StressArgs {
    /// Rigged character (.glb, .gltf, .autorig.json)
    rigged: PathBuf,

    /// Render output directory
    #[arg(short, long, default_value = "stress_test_renders")]
    output: PathBuf,

    /// Comma-separated pose names, or 'all'
    #[arg(long, default_value = ALL_POSES)]
    poses: String,

    /// Character name for the review sink (defaults to the file name)
    #[arg(long)]
    character: Option<String>,

    /// Rigging tool used (defaults to the one detected from bone names)
    #[arg(long)]
    tool: Option<String>,

    /// Notes for this iteration
    #[arg(long, default_value = "")]
    notes: String,

    /// Copy renders and a manifest into this review directory
    #[arg(long)]
    review_dir: Option<PathBuf>,

    /// Settings JSON file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Extra poses and bone aliases JSON file
    #[arg(long)]
    pose_file: Option<PathBuf>,
}

#[derive(Args)]
struct PresetsArgs {
    /// Extra character presets JSON file
    #[arg(long)]
    presets: Option<PathBuf>,
}

#[derive(Args)]
struct PosesArgs {
    /// Extra poses and bone aliases JSON file
    #[arg(long)]
    pose_file: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose, cli.quiet));

    if let Err(err) = run(cli.command) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Rig(args) => rig(args),
        Commands::Stress(args) => stress(args),
        Commands::Presets(args) => presets(args),
        Commands::Poses(args) => poses(args),
    }
}

fn settings_from(path: Option<&PathBuf>) -> Result<RigSettings> {
    match path {
        Some(path) => load_settings(path),
        None => Ok(RigSettings::default()),
    }
}

fn preset_library(path: Option<&PathBuf>) -> Result<PresetLibrary> {
    let mut presets = PresetLibrary::builtin();
    if let Some(path) = path {
        presets.load_file(path)?;
    }
    Ok(presets)
}

fn rig(args: RigArgs) -> Result<()> {
    let options = RigOptions {
        character: args.character,
        settings: settings_from(args.settings.as_ref())?,
        presets: preset_library(args.presets.as_ref())?,
        write_project: !args.no_project,
        checklist_path: args.checklist,
        ..RigOptions::default()
    };

    let report = rig_character(&args.input, &args.output, &options)?;

    println!("Character: {} (preset {})", report.character, report.preset);
    println!(
        "Mesh: {} -> {} faces, {} vertices (manifold: {})",
        report.repair.faces_in, report.repair.faces_out, report.repair.vertices_out, report.repair.manifold
    );
    println!("Bones: {}", report.bone_count);
    println!(
        "Weights: {} ({:.1}% coverage, max {} influences)",
        report.weights.tier.as_str(),
        report.weights.final_coverage * 100.0,
        report.weights.max_influences
    );
    println!(
        "Quality: {:.1}% ({})",
        report.quality.overall_score,
        if report.quality.production_ready { "production ready" } else { "needs work" }
    );
    println!("Output: {}", report.export.path.display());
    for path in [&report.project_path, &report.diagnostic_path, &report.checklist_path]
        .into_iter()
        .flatten()
    {
        println!("Wrote: {}", path.display());
    }
    if !report.issues.is_empty() {
        println!("Issues:");
        for issue in &report.issues {
            println!("  [{:?}] {}: {}", issue.severity, issue.code, issue.message);
        }
    }
    Ok(())
}

fn stress(args: StressArgs) -> Result<()> {
    let options = StressTestOptions {
        output_dir: args.output,
        poses: args.poses,
        character: args.character,
        rigging_tool: args.tool,
        notes: args.notes,
        pose_file: args.pose_file,
        review_dir: args.review_dir,
        settings: settings_from(args.settings.as_ref())?,
    };

    let report = run_stress_test(&args.rigged, &options)?;

    println!("Character: {} ({})", report.character_name, report.rigging_tool);
    println!("Bones: {}, Vertices: {}", report.bone_count, report.vertex_count);
    for outcome in &report.poses {
        let status = if outcome.flags.is_empty() {
            "ok".to_string()
        } else {
            format!("{:?}", outcome.flags)
        };
        println!("  {:<20} height {:>8.2} / {:<8.2} {status}", outcome.pose, outcome.height, outcome.rest_height);
    }
    println!(
        "Rendered {} images to {} ({} flagged poses)",
        report.rendered_images,
        report.output_dir.display(),
        report.flagged_poses.len()
    );
    if let Some(manifest) = &report.review_manifest {
        println!("Review manifest: {}", manifest.display());
    }
    println!("Report: {}", report.report_path.display());
    Ok(())
}

fn presets(args: PresetsArgs) -> Result<()> {
    let library = preset_library(args.presets.as_ref())?;
    println!("Presets:");
    for name in library.names() {
        println!("  {name}");
    }
    println!("Aliases:");
    for (alias, target) in library.aliases() {
        println!("  {alias} -> {target}");
    }
    Ok(())
}

fn poses(args: PosesArgs) -> Result<()> {
    let library = match &args.pose_file {
        Some(path) => load_pose_library(path)?,
        None => standard_pose_library(),
    };
    for (index, pose) in library.poses().iter().enumerate() {
        println!("{}. {}", index + 1, pose.name);
        if !pose.description.is_empty() {
            println!("   {}", pose.description);
        }
        if !pose.targets.is_empty() {
            println!("   Tests: {}", pose.targets);
        }
        if !pose.rotations.is_empty() {
            let joints: Vec<&str> = pose.rotations.keys().map(|joint| joint.as_str()).collect();
            println!("   Bones modified: {}", joints.join(", "));
        }
    }
    Ok(())
}
