//! Project initialization: `gatekeeper init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use gatekeeper::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized gatekeeper project at {}",
            result.config_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .gatekeeper/");
        println!("  ├── gatekeeper.toml  # Gate thresholds, pivot limits, hooks");
        println!("  ├── events.jsonl     # Run event log");
        println!("  └── logs/            # Rolling logs ([logging] file = true)");
        println!();
        println!("Next steps:");
        println!("  1. Run `gatekeeper start --project <name>` to open a validation run");
        println!("  2. Submit phase outputs with `gatekeeper submit <run-id> ...`");
        println!("  3. Answer checkpoints with `gatekeeper resolve <run-id>`");
    } else {
        println!(
            "Gatekeeper project already initialized at {}",
            result.config_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}
