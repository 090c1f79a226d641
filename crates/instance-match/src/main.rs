use instance_match::cli::parse_cli;
use instance_match::pipeline::{PipelineError, run_pipeline};
use instance_match::settings::resolve_settings;

use instance_match_embedder::{EmbedderKind, available_embedders};
use instance_match_segmenter::{SegmenterKind, available_segmenters};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), PipelineError> {
    let (args, sources) = parse_cli();

    if args.list_backends {
        print_available_backends();
        return Ok(());
    }

    let settings = resolve_settings(&args, &sources)?;
    run_pipeline(&settings).await?;
    Ok(())
}

fn print_available_backends() {
    let segmenters: Vec<&'static str> = available_segmenters()
        .iter()
        .copied()
        .map(SegmenterKind::as_str)
        .collect();
    let embedders: Vec<&'static str> = available_embedders()
        .iter()
        .copied()
        .map(EmbedderKind::as_str)
        .collect();
    println!("available segmentation backends: {}", segmenters.join(", "));
    println!("available embedding backends: {}", embedders.join(", "));
}
