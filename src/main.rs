use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use nailfeed_tryon::{ImageSource, NailTryOn, TryOnConfig, overlay, share};

const DEFAULT_OUTPUT: &str = "try-on.png";

struct Args {
    hand: String,
    design: String,
    output: PathBuf,
    debug_regions: bool,
    data_url: bool,
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut debug_regions = false;
    let mut data_url = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--debug-regions" => debug_regions = true,
            "--data-url" => data_url = true,
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            _ => positional.push(arg),
        }
    }
    let mut positional = positional.into_iter();
    let (Some(hand), Some(design)) = (positional.next(), positional.next()) else {
        bail!("usage: nailfeed-tryon <hand> <design> [output.png] [--debug-regions] [--data-url]");
    };
    let output = positional
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
    if let Some(extra) = positional.next() {
        bail!("unexpected argument {extra}");
    }
    Ok(Args {
        hand,
        design,
        output,
        debug_regions,
        data_url,
    })
}

fn regions_path(output: &Path) -> PathBuf {
    let mut name = output.file_stem().unwrap_or_default().to_os_string();
    name.push(".regions.png");
    output.with_file_name(name)
}

fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args()?;
    let try_on = NailTryOn::new(TryOnConfig::from_env());

    let result = try_on
        .apply_nail_design(
            &ImageSource::from(args.hand.as_str()),
            &ImageSource::from(args.design.as_str()),
        )
        .with_context(|| format!("could not apply {} to {}", args.design, args.hand))?;

    share::save_png(&result, &args.output)?;
    println!("{}", args.output.display());

    if args.debug_regions {
        let mut debug = result.image().clone();
        overlay::draw_region_outlines(&mut debug, result.regions());
        let path = regions_path(&args.output);
        debug
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", path.display());
    }

    if args.data_url {
        println!("{}", result.to_data_url()?);
    }

    Ok(())
}
