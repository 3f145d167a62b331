//! AXI-Lite bus-functional model.
//!
//! [`AxiLiteMaster`] drives single-beat write and read transactions
//! against an AXI-Lite slave, synchronizing on rising clock edges and the
//! valid/ready handshakes. Channel signals are resolved by their
//! conventional names from the design root at construction time.

#![warn(missing_docs)]

use strobe_core::error::{Failure, TbResult};
use strobe_core::handle::SimHandle;
use strobe_core::trigger::RisingEdge;

/// Cycles to wait for a response before a transaction fails.
const RESPONSE_TIMEOUT_CYCLES: u32 = 1_000;

/// Single-beat AXI-Lite master.
pub struct AxiLiteMaster {
    clk: SimHandle,
    awaddr: SimHandle,
    awvalid: SimHandle,
    wdata: SimHandle,
    wvalid: SimHandle,
    bvalid: SimHandle,
    bready: SimHandle,
    araddr: SimHandle,
    arvalid: SimHandle,
    rdata: SimHandle,
    rvalid: SimHandle,
    rready: SimHandle,
}

impl AxiLiteMaster {
    /// Binds the channel signals under `dut` by their conventional names
    /// (`clk`, `awaddr`, `awvalid`, `wdata`, `wvalid`, `bvalid`,
    /// `bready`, `araddr`, `arvalid`, `rdata`, `rvalid`, `rready`).
    pub fn new(dut: &SimHandle) -> Self {
        AxiLiteMaster {
            clk: dut.child("clk"),
            awaddr: dut.child("awaddr"),
            awvalid: dut.child("awvalid"),
            wdata: dut.child("wdata"),
            wvalid: dut.child("wvalid"),
            bvalid: dut.child("bvalid"),
            bready: dut.child("bready"),
            araddr: dut.child("araddr"),
            arvalid: dut.child("arvalid"),
            rdata: dut.child("rdata"),
            rvalid: dut.child("rvalid"),
            rready: dut.child("rready"),
        }
    }

    /// Writes one word at a byte address.
    ///
    /// Asserts the address and data channels together, releases them
    /// after the accepting edge, then waits for the write response.
    pub async fn write(&self, addr: u32, data: u32) -> TbResult {
        self.awaddr.value().set(i64::from(addr));
        self.awvalid.value().set(1);
        self.wdata.value().set(i64::from(data));
        self.wvalid.value().set(1);
        self.bready.value().set(1);

        RisingEdge::new(&self.clk).await;
        self.awvalid.value().set(0);
        self.wvalid.value().set(0);

        let mut cycles = 0;
        while !self.bvalid.value().as_bool() {
            cycles += 1;
            if cycles > RESPONSE_TIMEOUT_CYCLES {
                return Err(Failure::msg(format!(
                    "write response timeout at address {addr:#x}"
                )));
            }
            RisingEdge::new(&self.clk).await;
        }
        self.bready.value().set(0);
        Ok(())
    }

    /// Reads one word from a byte address.
    pub async fn read(&self, addr: u32) -> Result<u32, Failure> {
        self.araddr.value().set(i64::from(addr));
        self.arvalid.value().set(1);
        self.rready.value().set(1);

        RisingEdge::new(&self.clk).await;
        self.arvalid.value().set(0);

        let mut cycles = 0;
        while !self.rvalid.value().as_bool() {
            cycles += 1;
            if cycles > RESPONSE_TIMEOUT_CYCLES {
                return Err(Failure::msg(format!(
                    "read response timeout at address {addr:#x}"
                )));
            }
            RisingEdge::new(&self.clk).await;
        }
        let data = self.rdata.value().as_u32();
        self.rready.value().set(0);
        Ok(data)
    }
}
