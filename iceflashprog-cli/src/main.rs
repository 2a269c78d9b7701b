use hidapi::HidApi;
use iceflashprog::utils::{erase_plan, read_flash, verify_bitstream, write_bitstream, Step};
use iceflashprog::{Device, DeviceConfig, FlashGeometry, Generation, HidReportChannel};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

fn main() {
    pretty_env_logger::init();

    let args = Opt::from_args();

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = DeviceConfig {
        generation: if args.legacy {
            Generation::Legacy
        } else {
            Generation::Current
        },
        timeout: match args.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        },
    };
    log::debug!("{:?}", config);

    let api = HidApi::new()?;
    let mut d = Device::open(&api, args.serial.as_deref(), config)?;
    d.listen()?;

    d.power_up()?;

    let id = d.jedec_id()?;
    println!(
        "Manufacturer: {:#04x}\nDevice ID: {:#06x}",
        id.manufacturer, id.device_id
    );

    let geometry = FlashGeometry::DEFAULT;

    match args.cmd {
        Cmd::detect => {}
        Cmd::erase => {
            println!("Erasing chip ...");
            d.erase_chip()?;
            println!("Done!");
        }
        Cmd::read { file } => read(&d, &geometry, file)?,
        Cmd::write { file, no_erase } => {
            let binary = get_binary(file)?;
            write(&d, &geometry, &binary, !no_erase)?;
        }
        Cmd::verify { file } => {
            let binary = get_binary(file)?;
            let bar = progress_bar(binary.len() as u64, "Checking")?;
            verify_bitstream(&d, &binary, &geometry, |n| bar.inc(n))?;
            bar.finish();
        }
    }

    d.close()?;
    Ok(())
}

fn read(
    d: &Device<HidReportChannel>,
    geometry: &FlashGeometry,
    file: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = File::create(&file)?;

    let bar = progress_bar(u64::from(geometry.total_size), "Reading")?;
    let data = read_flash(d, geometry, |n| bar.inc(n))?;
    bar.finish();

    f.write_all(&data)?;
    Ok(())
}

fn write(
    d: &Device<HidReportChannel>,
    geometry: &FlashGeometry,
    binary: &[u8],
    erase: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let erase_bar = if erase {
        let (units, size) = erase_plan(binary.len(), geometry, d.config().generation);
        Some(progress_bar(units.len() as u64 * u64::from(size), "Erasing")?)
    } else {
        None
    };
    let write_bar = progress_bar(binary.len() as u64, "Writing")?;

    write_bitstream(d, binary, geometry, erase, |step, n| match step {
        Step::Erase => {
            if let Some(bar) = &erase_bar {
                bar.inc(n);
            }
        }
        Step::Write => write_bar.inc(n),
    })?;

    if let Some(bar) = &erase_bar {
        bar.finish();
    }
    write_bar.finish();
    Ok(())
}

fn progress_bar(len: u64, message: &'static str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:8} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-"),
    );
    bar.set_message(message);
    Ok(bar)
}

fn get_binary(file: PathBuf) -> Result<Vec<u8>, std::io::Error> {
    let mut f = File::open(file)?;
    let mut binary = Vec::new();
    f.read_to_end(&mut binary)?;
    Ok(binary)
}

#[allow(non_camel_case_types)]
#[derive(StructOpt, Debug, PartialEq)]
pub enum Cmd {
    /// detect flash memory and exit
    detect,

    /// erase whole flash memory
    erase,

    /// read whole flash memory to file
    read {
        #[structopt(short = "f", name = "file", long = "file", parse(from_os_str))]
        file: PathBuf,
    },

    /// erase the flash the file covers, then write it
    write {
        #[structopt(short = "f", name = "file", long = "file", parse(from_os_str))]
        file: PathBuf,
        /// do not erase flash before writing
        #[structopt(short = "n", long = "no-erase")]
        no_erase: bool,
    },

    /// compare file content against flash memory
    verify {
        #[structopt(short = "f", name = "file", long = "file", parse(from_os_str))]
        file: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(name = "iceflashprog", about = "SPI flash programmer for iCE40 FPGA boards")]
struct Opt {
    #[structopt(subcommand)]
    cmd: Cmd,

    /// device serial number, required when more than one programmer is plugged in
    #[structopt(short = "s", name = "serial", long = "serial")]
    serial: Option<String>,

    /// talk to legacy firmware, without block and chip erase
    #[structopt(long = "legacy")]
    legacy: bool,

    /// how long to wait for each response, 0 waits forever
    #[structopt(long = "timeout-ms", default_value = "5000")]
    timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_write() {
        let opt = Opt::from_iter(&["iceflashprog", "-s", "ABC", "write", "-f", "top.bin", "-n"]);

        assert_eq!(opt.serial.as_deref(), Some("ABC"));
        assert!(!opt.legacy);
        assert_eq!(opt.timeout_ms, 5000);
        assert_eq!(
            opt.cmd,
            Cmd::write {
                file: PathBuf::from("top.bin"),
                no_erase: true
            }
        );
    }

    #[test]
    fn parse_legacy_detect() {
        let opt = Opt::from_iter(&["iceflashprog", "--legacy", "--timeout-ms", "0", "detect"]);

        assert!(opt.legacy);
        assert_eq!(opt.timeout_ms, 0);
        assert_eq!(opt.cmd, Cmd::detect);
    }
}
