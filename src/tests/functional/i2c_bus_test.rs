// Licensed under the Apache-2.0 license

//! Whole-bus scenarios: masters and slaves built from full engines,
//! connected through the wired-AND simulation.

use crate::common::NoOpLogger;
use crate::i2c::bus::{Level, LineDrive, LineLevels};
use crate::i2c::common::{AddressMode, Error, I2cConfigBuilder, I2cSEvent, Role, TimingConfig};
use crate::i2c::controller::{ArbitrationState, ControllerState, I2cEngine};
use crate::i2c::simulation::{BusNode, SimulatedBus};
use crate::i2c::status::CompletedTransfer;
use crate::i2c::target::RegisterTarget;
use crate::i2c::traits::I2cTarget;
use crate::i2c::transaction::{Address, Transaction};
use embedded_hal::i2c::NoAcknowledgeSource;
use hex_literal::hex;

use ControllerState::*;

const TICK_LIMIT: usize = 2_000;

fn timing() -> TimingConfig {
    TimingConfig {
        scl_low_ticks: 3,
        scl_high_ticks: 2,
        start_hold_ticks: 2,
        stop_setup_ticks: 2,
        bus_free_ticks: 2,
    }
}

fn master() -> BusNode {
    let config = I2cConfigBuilder::new().timing(timing()).build().unwrap();
    BusNode::new(I2cEngine::default(), config)
}

fn slave<T: I2cTarget>(address: u16, target: T) -> BusNode<T> {
    let config = I2cConfigBuilder::new()
        .role(Role::Slave)
        .slave_address(address)
        .timing(timing())
        .build()
        .unwrap();
    BusNode::new(I2cEngine::new(target, NoOpLogger), config)
}

fn push_state(trace: &mut Vec<ControllerState>, state: ControllerState) {
    if trace.last() != Some(&state) {
        trace.push(state);
    }
}

fn write(address: u8, bytes: &[u8]) -> Transaction {
    Transaction::write(Address::SevenBit(address), bytes).unwrap()
}

fn start(node: &mut BusNode, transaction: Transaction) {
    node.engine.request_transfer(transaction, &node.config).unwrap();
}

/// Run a master against one peer until the master reports a result.
fn run_to_completion<T: I2cTarget>(
    bus: &mut SimulatedBus,
    master: &mut BusNode,
    peer: &mut BusNode<T>,
) -> CompletedTransfer {
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut *master, &mut *peer]);
        if let Some(done) = master.status.take_completed() {
            return done;
        }
    }
    panic!("transfer did not complete");
}

#[test]
fn test_master_write_acknowledged() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut s = slave(0x50, RegisterTarget::<256>::default());
    start(&mut m, write(0x50, &[0xAA]));

    let mut trace = Vec::new();
    let mut completions = 0;
    let mut nacks = 0;
    for _ in 0..400 {
        bus.step(&mut [&mut m, &mut s]);
        push_state(&mut trace, m.engine.state());
        completions += usize::from(m.status.transfer_complete_pulsed());
        nacks += usize::from(m.status.no_ack_pulsed());
    }

    assert_eq!(
        trace,
        [GenerateStart, AddressPhase, DataPhaseTx, AckPhaseTx, GenerateStop, Idle]
    );
    assert_eq!(completions, 1);
    assert_eq!(nacks, 0);
    let done = m.status.take_completed().unwrap();
    assert_eq!(done.result, Ok(()));
    assert_eq!(done.bytes_written, 1);

    assert_eq!(s.engine.state(), Idle);
    assert_eq!(s.engine.target().matched(), Some(0x50));
    assert_eq!(s.engine.target().pointer(), 0xAA);
    assert_eq!(s.engine.target().stops(), 1);
    assert_eq!(s.status.last_received(), Some(0xAA));
    assert_eq!(s.status.last_slave_event(), Some(I2cSEvent::SlaveStop));
    assert!(bus.levels().is_idle());
}

#[test]
fn test_missing_slave_nacks_address() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut nobody = ();
    start(&mut m, write(0x50, &[0xAA]));

    let mut trace = Vec::new();
    let mut completions = 0;
    let mut nacks = 0;
    for _ in 0..400 {
        bus.step(&mut [&mut m, &mut nobody]);
        push_state(&mut trace, m.engine.state());
        completions += usize::from(m.status.transfer_complete_pulsed());
        nacks += usize::from(m.status.no_ack_pulsed());
    }

    assert_eq!(trace, [GenerateStart, AddressPhase, GenerateStop, Idle]);
    assert_eq!(nacks, 1);
    assert_eq!(completions, 1);
    let done = m.status.take_completed().unwrap();
    assert_eq!(
        done.result,
        Err(Error::NoAcknowledge(NoAcknowledgeSource::Address))
    );
    assert_eq!(done.bytes_written, 0);
}

#[test]
fn test_foreign_address_leaves_slave_passive() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut s = slave(0x23, RegisterTarget::<4>::default());
    start(&mut m, write(0x24, &[0x00]));

    let mut slave_trace = Vec::new();
    for _ in 0..400 {
        bus.step(&mut [&mut m, &mut s]);
        push_state(&mut slave_trace, s.engine.state());
        assert!(!s.engine.drive().sda_low);
        assert!(!s.status.address_match_pulsed());
    }

    assert_eq!(slave_trace, [Idle, AwaitAddressMatch, Idle]);
    assert_eq!(s.status.last_slave_event(), Some(I2cSEvent::SlaveAddrNoMatch));
    assert_eq!(s.engine.target().matched(), None);
    assert_eq!(
        m.status.take_completed().unwrap().result,
        Err(Error::NoAcknowledge(NoAcknowledgeSource::Address))
    );
}

#[test]
fn test_arbitration_lost_on_first_differing_bit() {
    let mut bus = SimulatedBus::new();
    let mut m1 = master();
    let mut m2 = master();
    let mut s = slave(0x50, RegisterTarget::<256>::default());
    start(&mut m1, write(0x50, &[0xB5]));
    start(&mut m2, write(0x50, &[0xA5]));

    let mut lost_tick = None;
    for tick in 0..TICK_LIMIT {
        bus.step(&mut [&mut m1, &mut m2, &mut s]);
        if lost_tick.is_none() {
            if m1.engine.state() == ArbitrationLost {
                lost_tick = Some(tick);
                assert!(m1.status.arbitration_lost_pulsed());
                assert_eq!(
                    m1.engine.arbitration().lost_at_bit,
                    Some(3),
                    "0xB5 and 0xA5 first differ at bit 3"
                );
                assert!(m1.engine.arbitration().lost);
                assert_eq!(m2.engine.state(), DataPhaseTx);
                assert_eq!(m2.engine.shifter().bit_index(), 4);
                assert!(!m2.engine.arbitration().lost);
            } else {
                assert!(!m1.engine.arbitration().lost);
            }
        }
        assert!(!m2.status.arbitration_lost_pulsed());
    }

    assert!(lost_tick.is_some());
    assert_eq!(
        m1.status.take_completed().unwrap().result,
        Err(Error::ArbitrationLost)
    );
    assert_eq!(m1.engine.state(), Idle);
    assert_eq!(m1.engine.arbitration(), ArbitrationState::default());

    let winner = m2.status.take_completed().unwrap();
    assert_eq!(winner.result, Ok(()));
    assert_eq!(winner.bytes_written, 1);
    assert_eq!(s.engine.target().pointer(), 0xA5);
}

#[test]
fn test_arbitration_decided_in_address_byte() {
    let mut bus = SimulatedBus::new();
    let mut m1 = master();
    let mut m2 = master();
    let mut s = slave(0x50, RegisterTarget::<4>::default());
    // 0x50 << 1 = 0xA0 and 0x51 << 1 = 0xA2 differ at bit 6.
    start(&mut m1, write(0x51, &[0x01]));
    start(&mut m2, write(0x50, &[0x01]));

    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut m1, &mut m2, &mut s]);
    }

    assert!(m1.status.arbitration_lost_latched());
    assert_eq!(
        m1.status.take_completed().unwrap().result,
        Err(Error::ArbitrationLost)
    );
    assert_eq!(m2.status.take_completed().unwrap().result, Ok(()));
    assert_eq!(s.engine.target().pointer(), 1);
}

#[test]
fn test_slave_stretches_clock_until_ready() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut target = RegisterTarget::new([0x3C; 4]);
    target.stall(25);
    let mut s = slave(0x50, target);
    start(&mut m, Transaction::read(Address::SevenBit(0x50), 1).unwrap());

    let mut longest_low = 0;
    let mut low_run = 0;
    let mut done = None;
    for _ in 0..TICK_LIMIT {
        let levels = bus.step(&mut [&mut m, &mut s]);
        if levels.scl.is_low() {
            low_run += 1;
            longest_low = longest_low.max(low_run);
        } else {
            low_run = 0;
        }
        if let Some(result) = m.status.take_completed() {
            done = Some(result);
            break;
        }
    }

    assert!(longest_low >= 25, "SCL was only held low for {longest_low} ticks");
    let done = done.unwrap();
    assert_eq!(done.result, Ok(()));
    assert_eq!(done.read_data.as_slice(), &[0x3C]);
}

#[test]
fn test_slave_stretches_on_write() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut target = RegisterTarget::<4>::default();
    target.stall(12);
    let mut s = slave(0x50, target);
    start(&mut m, write(0x50, &hex!("02 5A")));

    let done = run_to_completion(&mut bus, &mut m, &mut s);
    assert_eq!(done.result, Ok(()));
    assert_eq!(done.bytes_written, 2);
    assert_eq!(s.engine.target().registers(), &hex!("00 00 5A 00"));
}

#[test]
fn test_busy_target_without_stretching_sends_idle_byte() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut target = RegisterTarget::new([0x3C; 4]);
    target.stall(5);
    let config = I2cConfigBuilder::new()
        .role(Role::Slave)
        .slave_address(0x50)
        .clock_stretching(false)
        .timing(timing())
        .build()
        .unwrap();
    let mut s = BusNode::new(I2cEngine::new(target, NoOpLogger), config);
    start(&mut m, Transaction::read(Address::SevenBit(0x50), 1).unwrap());

    let done = run_to_completion(&mut bus, &mut m, &mut s);
    assert_eq!(done.result, Ok(()));
    assert_eq!(done.read_data.as_slice(), &[0xFF]);
}

#[test]
fn test_write_read_uses_repeated_start() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut s = slave(0x50, RegisterTarget::new(hex!("10 20 30 40")));
    start(
        &mut m,
        Transaction::write_read(Address::SevenBit(0x50), &[0x01], 3).unwrap(),
    );

    let mut stops = 0;
    let mut restarts = 0;
    let mut done = None;
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut m, &mut s]);
        stops += usize::from(s.status.stop_detected_pulsed());
        restarts += usize::from(s.status.start_detected_pulsed());
        if let Some(result) = m.status.take_completed() {
            done = Some(result);
            break;
        }
    }

    let done = done.unwrap();
    assert_eq!(done.result, Ok(()));
    assert_eq!(done.read_data.as_slice(), &hex!("20 30 40"));
    assert_eq!(restarts, 2, "START plus one repeated START");
    assert_eq!(stops, 1);
}

#[test]
fn test_data_nack_ends_write() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut s = slave(0x50, RegisterTarget::<2>::default());
    start(&mut m, write(0x50, &hex!("05 00")));

    let done = run_to_completion(&mut bus, &mut m, &mut s);
    assert_eq!(done.result, Err(Error::NoAcknowledge(NoAcknowledgeSource::Data)));
    assert_eq!(done.bytes_written, 0);
    assert!(m.status.no_ack_latched());

    for _ in 0..20 {
        bus.step(&mut [&mut m, &mut s]);
    }
    assert_eq!(s.engine.state(), Idle);
    assert!(bus.levels().is_idle());
}

#[test]
fn test_ten_bit_write_and_read() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let config = I2cConfigBuilder::new()
        .role(Role::Slave)
        .address_mode(AddressMode::TenBit)
        .slave_address(0x2A5)
        .timing(timing())
        .build()
        .unwrap();
    let mut s = BusNode::new(I2cEngine::new(RegisterTarget::<4>::default(), NoOpLogger), config);

    start(
        &mut m,
        Transaction::write(Address::TenBit(0x2A5), &hex!("01 42")).unwrap(),
    );
    let done = run_to_completion(&mut bus, &mut m, &mut s);
    assert_eq!(done.result, Ok(()));
    assert_eq!(s.engine.target().registers(), &hex!("00 42 00 00"));
    assert_eq!(s.engine.target().matched(), Some(0x2A5));

    start(
        &mut m,
        Transaction::write_read(Address::TenBit(0x2A5), &[0x01], 1).unwrap(),
    );
    let done = run_to_completion(&mut bus, &mut m, &mut s);
    assert_eq!(done.result, Ok(()));
    assert_eq!(done.read_data.as_slice(), &[0x42]);
}

#[test]
fn test_ten_bit_slave_ignores_other_address() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let config = I2cConfigBuilder::new()
        .role(Role::Slave)
        .address_mode(AddressMode::TenBit)
        .slave_address(0x2A5)
        .timing(timing())
        .build()
        .unwrap();
    let mut s = BusNode::new(I2cEngine::new(RegisterTarget::<4>::default(), NoOpLogger), config);

    // Same two high bits, different low byte.
    start(
        &mut m,
        Transaction::write(Address::TenBit(0x2A6), &[0x01]).unwrap(),
    );
    let done = run_to_completion(&mut bus, &mut m, &mut s);
    assert_eq!(done.result, Err(Error::NoAcknowledge(NoAcknowledgeSource::Address)));
    assert_eq!(s.engine.target().matched(), None);
}

#[test]
fn test_general_call() {
    let config = |general_call| {
        I2cConfigBuilder::new()
            .role(Role::Slave)
            .slave_address(0x40)
            .general_call(general_call)
            .timing(timing())
            .build()
            .unwrap()
    };

    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut s = BusNode::new(I2cEngine::new(RegisterTarget::<8>::default(), NoOpLogger), config(true));
    start(&mut m, write(0x00, &[0x06]));
    let done = run_to_completion(&mut bus, &mut m, &mut s);
    assert_eq!(done.result, Ok(()));
    assert_eq!(s.engine.target().matched(), Some(0));
    assert_eq!(s.engine.target().pointer(), 6);

    let mut bus = SimulatedBus::new();
    let mut s = BusNode::new(I2cEngine::new(RegisterTarget::<8>::default(), NoOpLogger), config(false));
    start(&mut m, write(0x00, &[0x06]));
    let done = run_to_completion(&mut bus, &mut m, &mut s);
    assert_eq!(done.result, Err(Error::NoAcknowledge(NoAcknowledgeSource::Address)));
}

#[test]
fn test_dual_role_engines_take_turns() {
    let dual = |address| {
        let config = I2cConfigBuilder::new()
            .role(Role::Dual)
            .slave_address(address)
            .timing(timing())
            .build()
            .unwrap();
        BusNode::new(I2cEngine::new(RegisterTarget::<4>::default(), NoOpLogger), config)
    };
    let mut bus = SimulatedBus::new();
    let mut a = dual(0x10);
    let mut b = dual(0x20);

    a.engine
        .request_transfer(write(0x20, &hex!("01 99")), &a.config)
        .unwrap();
    let mut done = None;
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut a, &mut b]);
        if let Some(result) = a.status.take_completed() {
            done = Some(result);
            break;
        }
    }
    assert_eq!(done.unwrap().result, Ok(()));
    assert_eq!(b.engine.target().registers()[1], 0x99);
    assert_eq!(b.engine.state(), Idle);
    assert!(b.engine.shifter().at_boundary());

    b.engine
        .request_transfer(write(0x10, &hex!("02 77")), &b.config)
        .unwrap();
    let mut done = None;
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut a, &mut b]);
        if let Some(result) = b.status.take_completed() {
            done = Some(result);
            break;
        }
    }
    assert_eq!(done.unwrap().result, Ok(()));
    assert_eq!(a.engine.target().registers()[2], 0x77);
}

#[test]
fn test_recovery_frees_slave_stuck_mid_read() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut s = slave(0x50, RegisterTarget::<4>::default());
    start(&mut m, Transaction::read(Address::SevenBit(0x50), 2).unwrap());

    // Abandon the read while the slave is driving a zero bit.
    let mut abandoned = false;
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut m, &mut s]);
        if s.engine.state() == SlaveDataTx && s.engine.shifter().bit_index() == 3 {
            m.engine.reset();
            abandoned = true;
            break;
        }
    }
    assert!(abandoned);

    for _ in 0..10 {
        bus.step(&mut [&mut m, &mut s]);
    }
    assert!(bus.levels().scl.is_high());
    assert!(bus.levels().sda.is_low(), "slave should still hold SDA");

    m.engine.request_bus_recovery(&m.config).unwrap();
    let mut trace = Vec::new();
    let mut done = None;
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut m, &mut s]);
        push_state(&mut trace, m.engine.state());
        if let Some(result) = m.status.take_completed() {
            done = Some(result);
            break;
        }
    }
    assert_eq!(trace, [BusRecovery, GenerateStop, Idle]);
    assert_eq!(done.unwrap().result, Ok(()));

    bus.step(&mut [&mut m, &mut s]);
    assert!(bus.levels().is_idle());
    assert_eq!(s.engine.state(), Idle);
}

#[test]
fn test_recovery_gives_up_on_stuck_line() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut holder = LineDrive {
        scl_low: false,
        sda_low: true,
    };
    m.engine.request_bus_recovery(&m.config).unwrap();

    let mut done = None;
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut m, &mut holder]);
        if let Some(result) = m.status.take_completed() {
            done = Some(result);
            break;
        }
    }
    assert_eq!(done.unwrap().result, Err(Error::BusStuck));
    assert!(m.status.bus_error_latched());
    assert_eq!(m.engine.state(), Idle);
    assert!(m.engine.drive().is_released());
}

#[test]
fn test_reset_releases_bus_from_any_point() {
    for cutoff in (1..200).step_by(7) {
        let mut bus = SimulatedBus::new();
        let mut m = master();
        let mut s = slave(0x50, RegisterTarget::new(hex!("00 11 22 33")));
        start(
            &mut m,
            Transaction::write_read(Address::SevenBit(0x50), &[0x02], 2).unwrap(),
        );
        for _ in 0..cutoff {
            bus.step(&mut [&mut m, &mut s]);
        }

        for node_reset in 0..2 {
            m.engine.reset();
            s.engine.reset();
            assert_eq!(m.engine.state(), Idle, "cutoff {cutoff}, reset {node_reset}");
            assert_eq!(s.engine.state(), Idle);
            assert!(m.engine.drive().is_released());
            assert!(s.engine.drive().is_released());
            assert!(m.engine.transaction().is_none());
            assert_eq!(m.engine.arbitration(), ArbitrationState::default());
        }

        bus.step(&mut [&mut m, &mut s]);
        assert!(bus.levels().scl.is_high());
    }
}

#[test]
fn test_disable_aborts_transfer() {
    let mut bus = SimulatedBus::new();
    let mut m = master();
    let mut s = slave(0x50, RegisterTarget::<4>::default());
    start(&mut m, write(0x50, &hex!("00 01 02 03")));
    for _ in 0..40 {
        bus.step(&mut [&mut m, &mut s]);
    }
    assert!(m.engine.state().is_master_active());

    m.config.enabled = false;
    bus.step(&mut [&mut m, &mut s]);
    assert_eq!(m.engine.state(), Idle);
    assert!(m.engine.drive().is_released());
    assert_eq!(
        m.status.take_completed().unwrap().result,
        Err(Error::Disabled)
    );
    assert_eq!(
        m.engine.request_transfer(write(0x50, &[0x00]), &m.config),
        Err(Error::Disabled)
    );
}

#[test]
fn test_loser_retries_after_arbitration_loss() {
    let mut bus = SimulatedBus::new();
    let mut m1 = master();
    let mut m2 = master();
    let mut s = slave(0x50, RegisterTarget::<256>::default());
    start(&mut m1, write(0x50, &[0xB5]));
    start(&mut m2, write(0x50, &[0xA5]));
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut m1, &mut m2, &mut s]);
    }
    assert_eq!(
        m1.status.take_completed().unwrap().result,
        Err(Error::ArbitrationLost)
    );
    assert_eq!(m2.status.take_completed().unwrap().result, Ok(()));
    assert_eq!(m1.engine.state(), Idle);
    assert!(m1.engine.shifter().at_boundary());

    start(&mut m1, write(0x50, &[0xB5]));
    let mut done = None;
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut m1, &mut m2, &mut s]);
        if let Some(result) = m1.status.take_completed() {
            done = Some(result);
            break;
        }
    }
    assert_eq!(done.unwrap().result, Ok(()));
    assert_eq!(s.engine.target().pointer(), 0xB5);
    assert!(!m1.status.fatal_latched());
}

#[test]
fn test_new_transfer_after_stop_aborted_byte() {
    let mut m = master();
    start(&mut m, write(0x50, &[0x01]));

    // Run alone on the bus until the address byte is half shifted and
    // SCL is high with SDA low.
    let mut levels = LineLevels::IDLE;
    let mut mid_byte = false;
    for _ in 0..100 {
        levels = m.engine.tick(levels, &m.config, &mut m.status).levels();
        if m.engine.state() == AddressPhase
            && m.engine.shifter().bit_index() >= 2
            && m.engine.monitor().current() == LineLevels::new(Level::High, Level::Low)
        {
            mid_byte = true;
            break;
        }
    }
    assert!(mid_byte);

    // A foreign STOP in the middle of the byte.
    m.engine.tick(LineLevels::IDLE, &m.config, &mut m.status);
    assert_eq!(m.engine.state(), Idle);
    assert!(m.engine.shifter().at_boundary());
    assert_eq!(
        m.status.take_completed().unwrap().result,
        Err(Error::IllegalBusTransition)
    );

    let mut bus = SimulatedBus::new();
    let mut s = slave(0x50, RegisterTarget::<4>::default());
    start(&mut m, write(0x50, &hex!("01 02")));
    let done = run_to_completion(&mut bus, &mut m, &mut s);
    assert_eq!(done.result, Ok(()));
    assert_eq!(s.engine.target().registers()[1], 0x02);
}

#[test]
fn test_slave_role_then_master_role() {
    let config = I2cConfigBuilder::new()
        .role(Role::Dual)
        .slave_address(0x30)
        .timing(timing())
        .build()
        .unwrap();
    let mut dual = BusNode::new(I2cEngine::new(RegisterTarget::<4>::default(), NoOpLogger), config);
    let mut m = master();
    let mut bus = SimulatedBus::new();

    // Read from the dual engine, ending its slave frame with NACK + STOP.
    start(&mut m, Transaction::read(Address::SevenBit(0x30), 2).unwrap());
    let done = run_to_completion(&mut bus, &mut m, &mut dual);
    assert_eq!(done.result, Ok(()));
    assert_eq!(dual.engine.state(), Idle);

    let mut peer = slave(0x50, RegisterTarget::<4>::default());
    dual.engine
        .request_transfer(write(0x50, &hex!("03 C3")), &dual.config)
        .unwrap();
    let mut done = None;
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut dual, &mut m, &mut peer]);
        if let Some(result) = dual.status.take_completed() {
            done = Some(result);
            break;
        }
    }
    assert_eq!(done.unwrap().result, Ok(()));
    assert_eq!(peer.engine.target().registers()[3], 0xC3);
}

#[test]
fn test_recovery_with_one_tick_high_phase() {
    let quick = TimingConfig {
        scl_low_ticks: 2,
        scl_high_ticks: 1,
        start_hold_ticks: 1,
        stop_setup_ticks: 2,
        bus_free_ticks: 2,
    };
    let config = I2cConfigBuilder::new().timing(quick).build().unwrap();
    let mut m: BusNode = BusNode::new(I2cEngine::default(), config);
    let mut nobody = ();
    let mut bus = SimulatedBus::new();
    m.engine.request_bus_recovery(&m.config).unwrap();

    let mut done = None;
    for _ in 0..TICK_LIMIT {
        bus.step(&mut [&mut m, &mut nobody]);
        assert!(!m.status.bus_error_pulsed());
        if let Some(result) = m.status.take_completed() {
            done = Some(result);
            break;
        }
    }
    assert_eq!(done.unwrap().result, Ok(()));
    assert_eq!(m.status.last_error(), None);
    assert_eq!(m.engine.state(), Idle);
}
