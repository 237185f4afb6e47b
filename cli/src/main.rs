mod wav;

use berwave_core::noise::{bits_per_symbol, inject_noise, required_variance};
use berwave_core::power::estimate_power;
use berwave_core::selftest::{awgn_self_test, theory_ber, SELF_TEST_BITS, SELF_TEST_EBNO_DB};
use berwave_core::stats::parse_line;
use berwave_core::{
    apply_doppler, read_samples, score_frequency_estimates, write_samples, Codec2Tools, Complex32,
    DopplerProfile, SampleFormat, SweepConfig, SweepController, SweepResult, TelemetrySeries,
    TelemetryWindow, ToneLayout, DEFAULT_POWER_THRESHOLD_DB,
};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "berwave")]
#[command(about = "Channel simulation and BER measurement for FSK modems")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a BER sweep against the codec2 FSK utilities
    Sweep {
        /// JSON sweep configuration (defaults apply to missing fields)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory holding fsk_mod, fsk_demod, fsk_get_test_bits and fsk_put_test_bits
        #[arg(long, default_value = "../build/src")]
        codec2_utils: PathBuf,

        /// Where clean test signals are written
        #[arg(long, default_value = "./samples")]
        samples_dir: PathBuf,

        /// Where noisy signals and telemetry are written
        #[arg(long, default_value = "./generated")]
        generated_dir: PathBuf,

        /// Baud rates to sweep (repeatable)
        #[arg(short, long)]
        baud: Vec<u32>,

        /// FSK order (2 or 4)
        #[arg(short, long)]
        order: Option<u32>,

        /// Enable Doppler using this JSON profile
        #[arg(long)]
        doppler: Option<PathBuf>,

        /// Seed for the noise generator
        #[arg(long)]
        seed: Option<u64>,

        /// Kill a tool invocation after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write the sweep result as JSON
        #[arg(long, value_name = "RESULT.JSON")]
        output: Option<PathBuf>,
    },

    /// Add calibrated noise to a sample file
    AddNoise {
        /// Input samples (raw, or .wav)
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output samples (raw complex, or .wav I/Q)
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Target Eb/No in dB
        #[arg(short, long)]
        ebno: f64,

        /// Symbol rate of the signal
        #[arg(short, long)]
        baud: u32,

        /// FSK order (2 or 4)
        #[arg(short, long, default_value = "4")]
        order: u32,

        /// Sample rate of raw input (taken from the header for WAV)
        #[arg(short, long, default_value = "48000")]
        sample_rate: u32,

        /// Raw input format: f32, s16, cf32, cs16
        #[arg(long, default_value = "s16")]
        input_format: SampleFormat,

        /// Raw output format: cf32, cs16
        #[arg(long, default_value = "cs16")]
        output_format: SampleFormat,

        /// Ignore samples quieter than this when estimating power (dB)
        #[arg(long, default_value_t = DEFAULT_POWER_THRESHOLD_DB, allow_negative_numbers = true)]
        threshold_db: f64,

        /// Leave the output unnormalized
        #[arg(long)]
        no_normalize: bool,

        /// Seed for the noise generator
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Apply a Doppler profile to a sample file
    Doppler {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// JSON profile: {"time": [...], "offset": [...]}
        #[arg(value_name = "PROFILE.JSON")]
        profile: PathBuf,

        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        #[arg(short, long, default_value = "48000")]
        sample_rate: u32,

        #[arg(long, default_value = "s16")]
        input_format: SampleFormat,

        #[arg(long, default_value = "cs16")]
        output_format: SampleFormat,
    },

    /// Summarize a demodulator telemetry file
    Stats {
        #[arg(value_name = "INPUT.STATS")]
        input: PathBuf,

        /// Telemetry ticks per second
        #[arg(short, long, default_value = "50")]
        rate: u32,

        /// Score the frequency estimator for this baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        #[arg(short, long, default_value = "4")]
        order: u32,

        #[arg(long, default_value = "2000")]
        low_tone: f64,

        #[arg(long, default_value = "270")]
        tone_spacing: f64,

        /// Estimator error threshold as a fraction of the baud rate
        #[arg(long, default_value = "0.2")]
        threshold: f64,
    },

    /// Rolling summary of live telemetry read from stdin
    Monitor {
        /// Records kept in the rolling window
        #[arg(long, default_value = "100")]
        history: usize,

        /// Print a summary every N records
        #[arg(long, default_value = "10")]
        every: usize,
    },

    /// Check the AWGN channel simulation against BPSK theory
    SelfTest {
        #[arg(long, default_value_t = SELF_TEST_BITS)]
        bits: usize,

        #[arg(long, default_value_t = SELF_TEST_EBNO_DB)]
        ebno: f64,

        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sweep {
            config,
            codec2_utils,
            samples_dir,
            generated_dir,
            baud,
            order,
            doppler,
            seed,
            timeout_secs,
            output,
        } => {
            let mut sweep_config = match config {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
                None => SweepConfig::default(),
            };
            if !baud.is_empty() {
                sweep_config.baud_rates = baud;
            }
            if let Some(order) = order {
                sweep_config.order = order;
            }
            if let Some(profile) = doppler {
                sweep_config.doppler = true;
                sweep_config.doppler_file = profile;
            }
            if seed.is_some() {
                sweep_config.seed = seed;
            }
            if timeout_secs.is_some() {
                sweep_config.tool_timeout_secs = timeout_secs;
            }

            sweep_command(sweep_config, codec2_utils, samples_dir, generated_dir, output.as_deref())?
        }
        Commands::AddNoise {
            input,
            output,
            ebno,
            baud,
            order,
            sample_rate,
            input_format,
            output_format,
            threshold_db,
            no_normalize,
            seed,
        } => add_noise_command(
            &input,
            &output,
            NoiseArgs {
                ebno,
                baud,
                order,
                sample_rate,
                input_format,
                output_format,
                threshold_db,
                normalize: !no_normalize,
                seed,
            },
        )?,
        Commands::Doppler {
            input,
            profile,
            output,
            sample_rate,
            input_format,
            output_format,
        } => doppler_command(&input, &profile, &output, sample_rate, input_format, output_format)?,
        Commands::Stats {
            input,
            rate,
            baud,
            order,
            low_tone,
            tone_spacing,
            threshold,
        } => stats_command(&input, rate, baud, order, ToneLayout::new(low_tone, tone_spacing), threshold)?,
        Commands::Monitor { history, every } => monitor_command(history, every)?,
        Commands::SelfTest { bits, ebno, seed } => self_test_command(bits, ebno, seed)?,
    }

    Ok(())
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Load samples from a WAV file or a raw file of the given format
fn load_input(
    path: &Path,
    format: SampleFormat,
    sample_rate: u32,
) -> Result<(Vec<Complex32>, u32), Box<dyn std::error::Error>> {
    if wav::is_wav(path) {
        Ok(wav::read_wav(path)?)
    } else {
        let samples = read_samples(path, format)?;
        println!("Read {} {} samples from {}", samples.len(), format, path.display());
        Ok((samples, sample_rate))
    }
}

fn store_output(
    path: &Path,
    samples: &[Complex32],
    format: SampleFormat,
    sample_rate: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if wav::is_wav(path) {
        wav::write_wav(path, samples, sample_rate)?;
    } else {
        write_samples(path, samples, format)?;
    }
    println!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}

fn sweep_command(
    config: SweepConfig,
    codec2_utils: PathBuf,
    samples_dir: PathBuf,
    generated_dir: PathBuf,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut tools = Codec2Tools::new(codec2_utils, samples_dir, generated_dir)?;
    if let Some(secs) = config.tool_timeout_secs {
        tools = tools.with_timeout(Duration::from_secs(secs));
    }

    let order = config.order;
    let mut controller = SweepController::new(config, tools)?;
    let result = controller.run()?;

    print_result_table(&result, order);

    if let Some(path) = output {
        std::fs::write(path, result.to_json()?)?;
        println!("Wrote sweep result to {}", path.display());
    }
    Ok(())
}

fn print_result_table(result: &SweepResult, order: u32) {
    for run in &result.runs {
        println!("{}-FSK, {} baud", order, run.baud);
        if let Some(warning) = run.doppler_warning {
            println!("  Warning: {:?}", warning);
        }
        println!("  Eb/No (dB)   BER          Theory       Fest err");
        for point in &run.points {
            let theory = theory_ber(order, point.ebno)
                .map(|v| format!("{:.5e}", v))
                .unwrap_or_else(|| "-".to_string());
            let fest = point
                .freq_est_error
                .map(|v| format!("{:.4}", v))
                .unwrap_or_else(|| "-".to_string());
            println!("  {:>10.1}   {:<11.5e}  {:<11}  {}", point.ebno, point.ber, theory, fest);
        }
    }
}

struct NoiseArgs {
    ebno: f64,
    baud: u32,
    order: u32,
    sample_rate: u32,
    input_format: SampleFormat,
    output_format: SampleFormat,
    threshold_db: f64,
    normalize: bool,
    seed: Option<u64>,
}

fn add_noise_command(input: &Path, output: &Path, args: NoiseArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (samples, sample_rate) = load_input(input, args.input_format, args.sample_rate)?;

    let power = estimate_power(&samples, args.threshold_db)?;
    let variance = required_variance(
        power,
        sample_rate as f64,
        args.baud as f64,
        args.ebno,
        bits_per_symbol(args.order)? as f64,
        false,
    )?;
    println!("Signal power {:.4e}, noise variance {:.4e}", power, variance);

    let mut rng = rng_from(args.seed);
    let noisy = inject_noise(&samples, variance, args.normalize, &mut rng)?;
    store_output(output, &noisy, args.output_format, sample_rate)
}

fn doppler_command(
    input: &Path,
    profile: &Path,
    output: &Path,
    sample_rate: u32,
    input_format: SampleFormat,
    output_format: SampleFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let (samples, sample_rate) = load_input(input, input_format, sample_rate)?;
    let profile = DopplerProfile::load(profile)?;

    let shifted = apply_doppler(&samples, &profile, sample_rate)?;
    if let Some(warning) = shifted.warning {
        println!("Warning: {:?}", warning);
    }
    store_output(output, &shifted.samples, output_format, sample_rate)
}

fn stats_command(
    input: &Path,
    rate: u32,
    baud: Option<u32>,
    order: u32,
    tones: ToneLayout,
    threshold: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let series = TelemetrySeries::load(input, rate as f64)?;
    println!("Records: {}", series.len());
    if let Some(&duration) = series.time().last() {
        println!("Duration: {:.2} s", duration);
    }
    if let Some(ebno) = series.mean_ebno() {
        println!("Mean Eb/No: {:.2} dB", ebno);
    }
    if let Some(ppm) = series.mean_ppm() {
        println!("Mean clock offset: {:.1} ppm", ppm);
    }

    if let Some(baud) = baud {
        match score_frequency_estimates(&series, baud, &tones, order, threshold)? {
            Some(error) => println!("Frequency estimator error: {:.4}", error),
            None => println!("Frequency estimator error: no telemetry"),
        }
    }
    Ok(())
}

fn monitor_command(history: usize, every: usize) -> Result<(), Box<dyn std::error::Error>> {
    let mut window = TelemetryWindow::new(history);
    let every = every.max(1);
    let mut received = 0usize;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Some(record) = parse_line(&line?) else {
            continue;
        };
        window.push(record);
        received += 1;

        if received % every == 0 {
            if let Some(summary) = window.summary() {
                log::info!(
                    "Eb/No {:5.1} dB | ppm {:6.1} | tones {:.1} {:.1} {:.1} {:.1} | {} records",
                    summary.mean_ebno_db,
                    summary.mean_ppm,
                    summary.latest_tones[0],
                    summary.latest_tones[1],
                    summary.latest_tones[2],
                    summary.latest_tones[3],
                    summary.count
                );
            }
        }
    }

    println!("Received {} telemetry records", received);
    Ok(())
}

fn self_test_command(bits: usize, ebno: f64, seed: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = rng_from(seed);
    let report = awgn_self_test(&mut rng, bits, ebno)?;

    println!(
        "nb_errors: {} ber: {:4.3} ber_lower_limit: {:4.3} ber_upper_limit: {:4.3}",
        report.errors, report.ber, report.ber_lower_limit, report.ber_upper_limit
    );

    if report.passed() {
        println!("AWGN channel simulation test PASSED!");
        Ok(())
    } else {
        Err(format!("AWGN channel simulation test FAILED (tx power {:.3})", report.tx_power).into())
    }
}
