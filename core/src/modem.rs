//! Boundary to the external FSK modulator and demodulator
//!
//! The harness never modulates or demodulates itself. A [`Modem`] produces a
//! clean test signal and runs noisy signals through demodulation and bit
//! checking. [`Codec2Tools`] drives the codec2 command-line utilities.

use crate::error::{HarnessError, Result};
use crate::sample_io::{read_samples, write_samples, SampleFormat};
use crate::scorer::ToneLayout;
use crate::Complex32;
use std::fs;
use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Bit counts reported by the bit checker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitReport {
    pub bits_tested: u64,
    pub bit_errors: u64,
}

/// Extract the final bit-checker report from tool output
///
/// Expects lines like
/// `[0009] BER 0.000, bits tested  18000, bit errors      0 errs:    0`
/// and uses the last one. Returns `None` when no report is present, which is
/// what the checker prints (only its `Using ...` banner) when nothing decoded.
pub fn parse_bit_report(output: &str) -> Option<BitReport> {
    fn count_after(line: &str, label: &str) -> Option<u64> {
        let start = line.find(label)? + label.len();
        let digits: String = line[start..]
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    output.lines().rev().find_map(|line| {
        Some(BitReport {
            bits_tested: count_after(line, "bits tested")?,
            bit_errors: count_after(line, "bit errors")?,
        })
    })
}

/// Parameters for producing a clean test signal
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRequest {
    pub baud_rate: u32,
    pub order: u32,
    pub sample_rate: u32,
    pub tones: ToneLayout,
    pub num_bits: u64,
    pub frame_length: u32,
}

/// Parameters for one demodulation run
#[derive(Debug, Clone, PartialEq)]
pub struct DemodRequest {
    pub baud_rate: u32,
    pub order: u32,
    pub sample_rate: u32,
    /// Frequency estimator search range in Hz
    pub estimator_lower: u32,
    pub estimator_upper: u32,
    /// Tone spacing for the mask estimator, `None` for the peak estimator
    pub mask_spacing: Option<f64>,
    /// Telemetry ticks per second, `None` to disable telemetry
    pub stats_rate: Option<u32>,
    pub frame_length: u32,
    pub frame_threshold: f64,
    /// Names per-run artifacts such as the telemetry file
    pub label: String,
}

/// What came back from a demodulation run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemodOutcome {
    /// `None` when the bit checker reported nothing
    pub report: Option<BitReport>,
    /// Raw telemetry text, if requested and produced
    pub telemetry: Option<String>,
}

pub trait Modem {
    /// Produce a clean complex baseband test signal
    fn generate_source(&mut self, request: &SourceRequest) -> Result<Vec<Complex32>>;

    /// Demodulate a noisy signal and check its bits
    fn demodulate(&mut self, samples: &[Complex32], request: &DemodRequest) -> Result<DemodOutcome>;
}

/// Quote a path for `sh -c`
fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

/// Captured result of a shell pipeline
struct ToolOutput {
    status: ExitStatus,
    stdout: String,
}

/// codec2 FSK utilities run as shell pipelines
///
/// Needs `fsk_get_test_bits`, `fsk_mod`, `fsk_demod` and `fsk_put_test_bits`
/// in `utils_dir`. Clean sources are cached under `samples_dir`; noisy signals
/// and telemetry go to `generated_dir`.
#[derive(Debug, Clone)]
pub struct Codec2Tools {
    utils_dir: PathBuf,
    samples_dir: PathBuf,
    generated_dir: PathBuf,
    timeout: Option<Duration>,
}

impl Codec2Tools {
    pub fn new(utils_dir: PathBuf, samples_dir: PathBuf, generated_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&samples_dir)?;
        fs::create_dir_all(&generated_dir)?;
        Ok(Self {
            utils_dir,
            samples_dir,
            generated_dir,
            timeout: None,
        })
    }

    /// Kill tool invocations that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn tool(&self, name: &str) -> String {
        shell_quote(&self.utils_dir.join(name))
    }

    fn generate_command(&self, request: &SourceRequest, output: &Path) -> String {
        format!(
            "{} - {} {} | {} {} {} {} {} {} - {}",
            self.tool("fsk_get_test_bits"),
            request.num_bits,
            request.frame_length,
            self.tool("fsk_mod"),
            request.order,
            request.sample_rate,
            request.baud_rate,
            request.tones.base_tone,
            request.tones.tone_spacing,
            shell_quote(output),
        )
    }

    fn demod_command(&self, request: &DemodRequest, input: &Path, stats: Option<&Path>) -> String {
        let mut cmd = self.tool("fsk_demod");
        if let Some(spacing) = request.mask_spacing {
            cmd.push_str(&format!(" --mask {}", spacing));
        }
        cmd.push_str(&format!(
            " -b {} -u {} --cs16",
            request.estimator_lower, request.estimator_upper
        ));
        if let (Some(rate), Some(_)) = (request.stats_rate, stats) {
            cmd.push_str(&format!(" --stats={}", rate));
        }
        cmd.push_str(&format!(
            " {} {} {} {} -",
            request.order,
            request.sample_rate,
            request.baud_rate,
            shell_quote(input)
        ));
        if let Some(stats) = stats {
            cmd.push_str(&format!(" 2> {}", shell_quote(stats)));
        }
        cmd.push_str(&format!(
            " | {} -f {} -t {:.2} - 2>&1",
            self.tool("fsk_put_test_bits"),
            request.frame_length,
            request.frame_threshold
        ));
        cmd
    }

    fn run(&self, tool: &str, cmd: &str) -> Result<ToolOutput> {
        log::info!("Executing {}: {}", tool, cmd);

        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd).stdout(Stdio::piped());
        // Pipeline stages share the shell's group so a timeout can kill them all
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn()?;

        let mut stdout = child.stdout.take().ok_or_else(|| HarnessError::ToolFailure {
            tool: tool.to_string(),
            reason: "stdout not captured".to_string(),
        })?;

        // Drain stdout concurrently so a chatty pipeline cannot block on a full pipe
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        let waited = match self.timeout {
            Some(limit) => wait_with_timeout(&mut child, limit, tool),
            None => child.wait().map_err(HarnessError::from),
        };

        // Every writer of the pipe is gone by now, so the reader sees EOF
        let bytes = reader
            .join()
            .map_err(|_| HarnessError::ToolFailure {
                tool: tool.to_string(),
                reason: "output reader panicked".to_string(),
            })??;

        Ok(ToolOutput {
            status: waited?,
            stdout: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

fn wait_with_timeout(child: &mut Child, limit: Duration, tool: &str) -> Result<ExitStatus> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if started.elapsed() < limit => thread::sleep(Duration::from_millis(100)),
            Ok(None) => {
                log::error!("{} exceeded {:?}, killing process group {}", tool, limit, child.id());
                kill_process_group(child);
                return Err(HarnessError::ToolTimeout {
                    tool: tool.to_string(),
                    secs: limit.as_secs(),
                });
            }
            Err(e) => {
                kill_process_group(child);
                return Err(e.into());
            }
        }
    }
}

/// Kill the shell and every pipeline stage it started, then reap the shell
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    // The shell leads its own group, so its PID is the group ID
    let group = format!("kill -KILL -- -{}", child.id());
    if let Err(e) = Command::new("sh").arg("-c").arg(&group).status() {
        log::warn!("Failed to kill process group {}: {}", child.id(), e);
    }
    child.kill().ok();
    child.wait().ok();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    child.kill().ok();
    child.wait().ok();
}

impl Modem for Codec2Tools {
    fn generate_source(&mut self, request: &SourceRequest) -> Result<Vec<Complex32>> {
        let path = self.samples_dir.join(format!(
            "fsk_{}_{}_{}_s16.bin",
            request.order, request.sample_rate, request.baud_rate
        ));

        log::info!(
            "Generating test signal: {}-FSK, {} baud, {} bits",
            request.order,
            request.baud_rate,
            request.num_bits
        );

        let output = self.run("fsk_mod", &self.generate_command(request, &path))?;
        if !output.status.success() {
            return Err(HarnessError::ToolFailure {
                tool: "fsk_mod".to_string(),
                reason: format!("{} ({})", output.status, output.stdout.trim()),
            });
        }

        read_samples(&path, SampleFormat::S16)
    }

    fn demodulate(&mut self, samples: &[Complex32], request: &DemodRequest) -> Result<DemodOutcome> {
        let input = self.generated_dir.join("temp.cs16");
        write_samples(&input, samples, SampleFormat::Cs16)?;

        let stats_path = request
            .stats_rate
            .map(|_| self.generated_dir.join(format!("{}.stats", request.label)));

        let cmd = self.demod_command(request, &input, stats_path.as_deref());
        let output = self.run("fsk_demod", &cmd)?;

        // The bit checker exits nonzero on a failing run but still prints its report
        if !output.status.success() {
            log::warn!("Demodulator pipeline exited with {}", output.status);
        }

        let report = parse_bit_report(&output.stdout);
        match report {
            Some(r) => log::info!("Bits: {}, Errors: {}", r.bits_tested, r.bit_errors),
            None => log::warn!("No bits decoded"),
        }

        let telemetry = match stats_path {
            Some(path) => match fs::read(&path) {
                Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => {
                    log::warn!("Telemetry file {} unavailable: {}", path.display(), e);
                    None
                }
            },
            None => None,
        };

        Ok(DemodOutcome { report, telemetry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demod_request(stats: bool) -> DemodRequest {
        DemodRequest {
            baud_rate: 100,
            order: 4,
            sample_rate: 48000,
            estimator_lower: 100,
            estimator_upper: 23000,
            mask_spacing: Some(270.0),
            stats_rate: if stats { Some(50) } else { None },
            frame_length: 2000,
            frame_threshold: 0.4,
            label: "fsk_100_4.0".to_string(),
        }
    }

    #[test]
    fn test_parse_report_with_trailing_pass() {
        let output = "Using: frame length 2000\n\
                      [0008] BER 0.001, bits tested  16000, bit errors     12\n\
                      [0009] BER 0.000, bits tested  18000, bit errors      3 errs:    0\n\
                      PASS\n";
        assert_eq!(
            parse_bit_report(output),
            Some(BitReport { bits_tested: 18000, bit_errors: 3 })
        );
    }

    #[test]
    fn test_parse_report_without_errs_suffix() {
        let output = "[0001] BER 0.500, bits tested 2000, bit errors 1000\nFAIL\n";
        assert_eq!(
            parse_bit_report(output),
            Some(BitReport { bits_tested: 2000, bit_errors: 1000 })
        );
    }

    #[test]
    fn test_parse_no_bits_decoded() {
        assert_eq!(parse_bit_report("Using: frame length 2000 threshold 0.40\nFAIL\n"), None);
        assert_eq!(parse_bit_report(""), None);
        assert_eq!(parse_bit_report("bits tested , bit errors 0"), None);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote(Path::new("/tmp/a b")), "'/tmp/a b'");
        assert_eq!(shell_quote(Path::new("it's")), r"'it'\''s'");
    }

    #[test]
    fn test_demod_command_layout() {
        let dir = std::env::temp_dir().join(format!("berwave_cmd_{}", std::process::id()));
        let tools = Codec2Tools::new(PathBuf::from("/opt/codec2"), dir.join("s"), dir.join("g")).unwrap();

        let cmd = tools.demod_command(
            &demod_request(true),
            Path::new("/g/temp.cs16"),
            Some(Path::new("/g/fsk_100_4.0.stats")),
        );
        assert_eq!(
            cmd,
            "'/opt/codec2/fsk_demod' --mask 270 -b 100 -u 23000 --cs16 --stats=50 4 48000 100 \
             '/g/temp.cs16' - 2> '/g/fsk_100_4.0.stats' | '/opt/codec2/fsk_put_test_bits' \
             -f 2000 -t 0.40 - 2>&1"
        );

        let quiet = tools.demod_command(&demod_request(false), Path::new("/g/temp.cs16"), None);
        assert!(!quiet.contains("--stats"));
        assert!(!quiet.contains("2> "));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_generate_command_layout() {
        let dir = std::env::temp_dir().join(format!("berwave_gen_{}", std::process::id()));
        let tools = Codec2Tools::new(PathBuf::from("/opt/codec2"), dir.join("s"), dir.join("g")).unwrap();
        let request = SourceRequest {
            baud_rate: 50,
            order: 2,
            sample_rate: 48000,
            tones: ToneLayout::new(2000.0, 270.0),
            num_bits: 20000,
            frame_length: 2000,
        };

        let cmd = tools.generate_command(&request, Path::new("/s/out.bin"));
        assert_eq!(
            cmd,
            "'/opt/codec2/fsk_get_test_bits' - 20000 2000 | '/opt/codec2/fsk_mod' 2 48000 50 2000 270 - '/s/out.bin'"
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_tools_degrade_to_no_report() {
        let dir = std::env::temp_dir().join(format!("berwave_missing_{}", std::process::id()));
        let mut tools =
            Codec2Tools::new(dir.join("no-such-utils"), dir.join("s"), dir.join("g")).unwrap();

        let samples = vec![Complex32::new(0.5, 0.0); 16];
        let outcome = tools.demodulate(&samples, &demod_request(false)).unwrap();
        assert_eq!(outcome.report, None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(target_os = "linux")]
    fn write_script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Running or not yet reaped (anything but a zombie)
    #[cfg(target_os = "linux")]
    fn process_alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map_or(false, |rest| rest.trim_start().chars().next() != Some('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_timeout_kills_whole_pipeline() {
        let dir = std::env::temp_dir().join(format!("berwave_timeout_{}", std::process::id()));
        let utils = dir.join("utils");
        std::fs::create_dir_all(&utils).unwrap();
        let pid_file = dir.join("demod.pid");

        // A demodulator that never finishes, and a checker waiting on its output
        write_script(
            &utils.join("fsk_demod"),
            &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
        );
        write_script(&utils.join("fsk_put_test_bits"), "cat > /dev/null");

        let mut tools = Codec2Tools::new(utils, dir.join("s"), dir.join("g"))
            .unwrap()
            .with_timeout(Duration::from_secs(1));

        let started = Instant::now();
        let samples = vec![Complex32::new(0.5, 0.0); 16];
        let err = tools.demodulate(&samples, &demod_request(false)).unwrap_err();
        assert!(matches!(err, HarnessError::ToolTimeout { secs: 1, .. }), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10), "output reader was left blocked");

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let deadline = Instant::now() + Duration::from_secs(3);
        while process_alive(&pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!process_alive(&pid), "demodulator {} survived the timeout", pid);

        std::fs::remove_dir_all(&dir).ok();
    }
}
