use std::env;

use mpsse_taps::jtag::{Jtag, JtagConfig};
use mpsse_taps::mpsse::{Mpsse, MpsseConfig};
use mpsse_taps::transport::ftd2xx::Ftd2xxTransport;

const IDCODE: u8 = 0xfe;

fn main() -> mpsse_taps::Result<()> {
    env_logger::init();

    let description = env::args().nth(1).unwrap_or_else(|| "Dual RS232-HS A".to_owned());
    let ft = Ftd2xxTransport::with_description(&description)?;
    println!("{:?} {}", ft.chip_type(), description);

    let config = JtagConfig {
        frequency: 1 << 20,
        ..JtagConfig::default()
    };
    let mut jtag = Jtag::new(Mpsse::new(ft, MpsseConfig::default())?, config)?;
    jtag.open()?;

    let ir = jtag.scan_ir(8, &[IDCODE])?;
    println!("ir: {:02x?}", ir);
    let dr = jtag.scan_dr_zeros(32)?;
    let idcode = u32::from_le_bytes([dr[0], dr[1], dr[2], dr[3]]);
    println!("idcode: {:#010x}", idcode);

    jtag.close()
}
