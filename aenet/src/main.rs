//! This crate provides a command line interface to the dense autoencoders of the `ml` crate,
//! to reconstruct images, look at their latent coordinates and manage weight files.

use aenet::{
    blank_batch, format_shape, latent_header, latent_rows, load_images, load_model,
    output_target, write_reconstruction, InputError,
};
use env_logger::Builder;
use log::info;
use ml::{
    models::{AutoencoderModel, ModelKind, Parameterized},
    weight_loader::save_npz,
};
use quicli::prelude::*;
use rand::{rngs::StdRng, SeedableRng};
use std::path::PathBuf;
use structopt::StructOpt;

/// Seed option for subcommands that may initialize parameters randomly
#[derive(Debug, StructOpt)]
struct SeedOpts {
    /// Seed for the random initialization
    #[structopt(long = "seed")]
    seed: Option<u64>,
}

impl SeedOpts {
    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Options shared by all subcommands that need a model with parameters
#[derive(Debug, StructOpt)]
struct WeightOpts {
    /// Weight file (.npz or .json) with the model parameters. Without it, the model is
    /// randomly initialized.
    #[structopt(short = "w", long = "weights", parse(from_os_str))]
    weights: Option<PathBuf>,
    #[structopt(flatten)]
    seed: SeedOpts,
}

impl WeightOpts {
    fn model(&self, kind: ModelKind) -> Result<Box<dyn AutoencoderModel>, InputError> {
        load_model(kind, self.weights.as_deref(), &mut self.seed.rng())
    }
}

/// Reconstructs images with an autoencoder
#[derive(Debug, StructOpt)]
struct ReconstructOpts {
    /// Path to the input, a 28x28 grayscale image (.png, .jpg) or an .npy array of
    /// shape (batch, 1, 28, 28)
    #[structopt(parse(from_os_str))]
    input: PathBuf,
    /// Output path (.png or .npy), writes to /path/to/input-reconstructed.png if not available
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: Option<PathBuf>,
    /// Model to use, "linear" or "vis"
    #[structopt(short = "m", long = "model", default_value = "linear")]
    model: ModelKind,
    #[structopt(flatten)]
    weights: WeightOpts,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Prints the latent coordinates of images as CSV
#[derive(Debug, StructOpt)]
struct LatentOpts {
    /// Paths to the inputs, images or .npy arrays
    #[structopt(parse(from_os_str), raw(required = "true"))]
    inputs: Vec<PathBuf>,
    /// Model to use, "linear" or "vis"
    #[structopt(short = "m", long = "model", default_value = "vis")]
    model: ModelKind,
    #[structopt(flatten)]
    weights: WeightOpts,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Writes freshly initialized parameters to an .npz file
#[derive(Debug, StructOpt)]
struct InitOpts {
    /// Output path of the .npz file
    #[structopt(parse(from_os_str))]
    output: PathBuf,
    /// Model to initialize, "linear" or "vis"
    #[structopt(short = "m", long = "model", default_value = "linear")]
    model: ModelKind,
    #[structopt(flatten)]
    seed: SeedOpts,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Prints the parameters of a model
#[derive(Debug, StructOpt)]
struct SummaryOpts {
    /// Model to describe, "linear" or "vis"
    #[structopt(short = "m", long = "model", default_value = "linear")]
    model: ModelKind,
    #[structopt(flatten)]
    weights: WeightOpts,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Reconstruct 28x28 grayscale images with small dense autoencoders.
#[derive(Debug, StructOpt)]
#[structopt(name = "aenet")]
enum Aenet {
    #[structopt(
        name = "reconstruct",
        about = "Runs images through an autoencoder and saves the reconstruction."
    )]
    Reconstruct(ReconstructOpts),
    #[structopt(
        name = "latent",
        about = "Prints the latent representation of images to StdOut, one CSV row per image. \
        With the vis model these are 3D coordinates that can be plotted directly."
    )]
    Latent(LatentOpts),
    #[structopt(name = "init", about = "Writes a freshly initialized weight file.")]
    Init(InitOpts),
    #[structopt(
        name = "summary",
        about = "Prints names and shapes of all model parameters."
    )]
    Summary(SummaryOpts),
}

/// Trait for the subcommands that aenet uses
trait AenetOpts {
    /// Performs the subcommand
    fn run(&self) -> CliResult;
    /// Returns the verbosity command
    fn get_verbosity(&self) -> &Verbosity;
    /// Sets up logging
    fn setup_env_logger(&self) -> CliResult {
        let mut builder = Builder::from_default_env();

        builder
            .filter(None, self.get_verbosity().log_level().to_level_filter())
            .init();

        Ok(())
    }
}

impl AenetOpts for ReconstructOpts {
    // Performs the reconstruction
    fn run(&self) -> CliResult {
        let images = load_images(&self.input)?;
        let model = self.weights.model(self.model)?;

        let (reconstruction, latent) = model.reconstruct(images.view())?;
        info!(
            "Reconstructed {} image(s) through a latent space of shape {:?}",
            reconstruction.len_of(ndarray::Axis(0)),
            latent.shape()
        );

        let target = output_target(
            &self.input,
            self.output.as_deref(),
            reconstruction.len_of(ndarray::Axis(0)),
        )?;
        write_reconstruction(&reconstruction, &target)?;
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AenetOpts for LatentOpts {
    // Prints latent coordinates to StdOut
    fn run(&self) -> CliResult {
        let model = self.weights.model(self.model)?;

        println!("{}", latent_header(model.latent_dimension()));
        for input in &self.inputs {
            let images = load_images(input)?;
            let latent = model.encode(images.view())?;
            for row in latent_rows(&input.display().to_string(), &latent) {
                println!("{}", row);
            }
        }
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AenetOpts for InitOpts {
    // Writes a fresh weight file
    fn run(&self) -> CliResult {
        let model = self.model.random(&mut self.seed.rng());
        save_npz(&*model, &self.output)?;
        info!(
            "Wrote {} parameters of the {} model to {}",
            model.num_parameters(),
            self.model,
            self.output.display()
        );
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AenetOpts for SummaryOpts {
    // Prints parameter names and shapes to StdOut
    fn run(&self) -> CliResult {
        let model = self.weights.model(self.model)?;

        println!(
            "model: {} (latent dimension {})",
            self.model,
            model.latent_dimension()
        );
        for (name, param) in model.parameters() {
            println!("{:<20} {}", name, format_shape(param.shape()));
        }
        println!("total parameters: {}", model.num_parameters());

        // one forward pass to show the shapes flowing through the model
        let input = blank_batch(1);
        let (reconstruction, latent) = model.reconstruct(input.view())?;
        println!(
            "{} -> {} -> {}",
            format_shape(input.shape()),
            format_shape(latent.shape()),
            format_shape(reconstruction.shape())
        );
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AenetOpts for Aenet {
    fn run(&self) -> CliResult {
        match self {
            Aenet::Reconstruct(c) => c.run(),
            Aenet::Latent(c) => c.run(),
            Aenet::Init(c) => c.run(),
            Aenet::Summary(c) => c.run(),
        }
    }

    fn get_verbosity(&self) -> &Verbosity {
        match self {
            Aenet::Reconstruct(c) => c.get_verbosity(),
            Aenet::Latent(c) => c.get_verbosity(),
            Aenet::Init(c) => c.get_verbosity(),
            Aenet::Summary(c) => c.get_verbosity(),
        }
    }
}

fn main() -> CliResult {
    let args = Aenet::from_args();
    args.setup_env_logger()?;
    args.run()
}
