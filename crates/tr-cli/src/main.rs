//! Training driver: load a GPT-2 checkpoint, run AdamW steps over a token
//! stream with periodic validation, and sample from the model as it trains.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use clap::Parser;

use tr_model::{DataLoader, Gpt2, ModelError};
use tr_sampler::{MultinomialSampler, Sampler};

/// GPT-2's `<|endoftext|>` token, used as the generation prompt.
const EOT_TOKEN: i32 = 50256;

/// Token file pairs probed in preference order when none is given.
const TOKEN_FILE_CANDIDATES: &[(&str, &str)] = &[
    (
        "data/tiny_shakespeare_train.bin",
        "data/tiny_shakespeare_val.bin",
    ),
    ("data/TinyStories_train.bin", "data/TinyStories_val.bin"),
];

#[derive(Parser, Debug)]
#[command(
    name = "tr-train",
    about = "CPU training loop for GPT-2 family checkpoints"
)]
struct Args {
    /// Model checkpoint to load.
    #[arg(long, default_value = "gpt2_124M.bin")]
    checkpoint: PathBuf,

    /// Training token file (probed from known locations when omitted).
    #[arg(long)]
    train_tokens: Option<PathBuf>,

    /// Validation token file (defaults to the training file's sibling).
    #[arg(long)]
    val_tokens: Option<PathBuf>,

    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    #[arg(long, default_value_t = 64)]
    seq_len: usize,

    /// Number of optimizer steps.
    #[arg(long, default_value_t = 40)]
    steps: usize,

    #[arg(long, default_value_t = 1e-4)]
    learning_rate: f32,

    #[arg(long, default_value_t = 0.9)]
    beta1: f32,

    #[arg(long, default_value_t = 0.999)]
    beta2: f32,

    #[arg(long, default_value_t = 1e-8)]
    eps: f32,

    #[arg(long, default_value_t = 0.0)]
    weight_decay: f32,

    /// Report validation loss every this many steps.
    #[arg(long, default_value_t = 10)]
    val_every: usize,

    /// Number of validation batches per report.
    #[arg(long, default_value_t = 5)]
    val_batches: usize,

    /// Sample from the model every this many steps.
    #[arg(long, default_value_t = 20)]
    sample_every: usize,

    /// Number of tokens to sample (capped at the sequence length).
    #[arg(long, default_value_t = 64)]
    sample_len: usize,

    /// RNG seed for sampling.
    #[arg(long, default_value_t = 1337)]
    seed: u64,

    /// Write the trained checkpoint here on completion.
    #[arg(long)]
    save: Option<PathBuf>,
}

fn pick_token_files(args: &Args) -> Result<(PathBuf, PathBuf), ModelError> {
    if let Some(train) = &args.train_tokens {
        let val = args.val_tokens.clone().unwrap_or_else(|| train.clone());
        return Ok((train.clone(), val));
    }
    for (train, val) in TOKEN_FILE_CANDIDATES {
        if Path::new(train).exists() {
            let val = if Path::new(val).exists() { val } else { train };
            return Ok((PathBuf::from(train), PathBuf::from(val)));
        }
    }
    Err(ModelError::Other(format!(
        "no token files found; expected one of: {}",
        TOKEN_FILE_CANDIDATES
            .iter()
            .map(|(train, _)| *train)
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// Mean validation loss over the first `n_batches` of the validation stream.
fn validation_loss(
    model: &mut Gpt2,
    loader: &mut DataLoader,
    n_batches: usize,
    b: usize,
    t: usize,
) -> Result<f32, ModelError> {
    loader.reset();
    let mut total = 0.0f32;
    for _ in 0..n_batches {
        let (inputs, targets) = loader.next_batch();
        model.forward(inputs, Some(targets), b, t)?;
        total += model
            .mean_loss()
            .ok_or(ModelError::StateViolation("targeted forward produced no loss"))?;
    }
    Ok(total / n_batches as f32)
}

/// Autoregressively sample `sample_len` tokens starting from the end-of-text
/// prompt, reusing the training batch shape.
fn generate(
    model: &mut Gpt2,
    sampler: &mut MultinomialSampler,
    b: usize,
    t: usize,
    sample_len: usize,
) -> Result<Vec<i32>, ModelError> {
    let n_vocab = model.config().n_vocab;
    let prompt = if (EOT_TOKEN as usize) < n_vocab { EOT_TOKEN } else { 0 };
    let mut tokens = vec![prompt; b * t];
    let n = sample_len.min(t);
    for ti in 1..n {
        model.forward(&tokens, None, b, t)?;
        let probs = model.probs_row(0, ti - 1)?;
        tokens[ti] = sampler.sample(probs) as i32;
    }
    Ok(tokens[..n].to_vec())
}

fn run(args: &Args) -> Result<(), ModelError> {
    let (b, t) = (args.batch_size, args.seq_len);

    let mut model = Gpt2::from_checkpoint(&args.checkpoint)?;
    log::info!(
        "model ready: {} parameters, head_dim={}",
        model.num_parameters(),
        model.config().head_dim()
    );

    let (train_path, val_path) = pick_token_files(args)?;
    let mut train_loader = DataLoader::open(&train_path, b, t)?;
    let mut val_loader = DataLoader::open(&val_path, b, t)?;
    let mut sampler = MultinomialSampler::new(args.seed);

    for step in 0..=args.steps {
        if args.val_every > 0 && step % args.val_every == 0 {
            let val_loss = validation_loss(&mut model, &mut val_loader, args.val_batches, b, t)?;
            println!("step {}: val loss {:.6}", step, val_loss);
        }

        if args.sample_every > 0 && step > 0 && step % args.sample_every == 0 {
            let tokens = generate(&mut model, &mut sampler, b, t, args.sample_len)?;
            let rendered: Vec<String> = tokens.iter().map(|tok| tok.to_string()).collect();
            println!("generated tokens: {}", rendered.join(" "));
        }

        if step == args.steps {
            break;
        }

        let start = Instant::now();
        let (inputs, targets) = train_loader.next_batch();
        model.forward(inputs, Some(targets), b, t)?;
        model.zero_grad();
        model.backward()?;
        model.update(
            args.learning_rate,
            args.beta1,
            args.beta2,
            args.eps,
            args.weight_decay,
        )?;
        let loss = model
            .mean_loss()
            .ok_or(ModelError::StateViolation("targeted forward produced no loss"))?;
        println!(
            "step {}: train loss {:.6} ({} ms)",
            step + 1,
            loss,
            start.elapsed().as_millis()
        );
    }

    if let Some(path) = &args.save {
        tr_model::checkpoint::save(path, model.config(), model.params())?;
        log::info!("saved trained checkpoint to {}", path.display());
    }

    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("fatal: {}", err);
        process::exit(1);
    }
}
