//! Stack allocation and return-control-stack scenarios.

mod common;

use common::{halt, load_program, op, rig, run_to_stop, CODE_BDI};
use komodo_types::Word36;
use komodo_vm::consts::{BR_RCS, GRS_EX0};
use komodo_vm::ip::registers::pack_l_bdi;
use komodo_vm::ip::{Opcode, StopReason};
use komodo_vm::loader::BankDeclaration;

const STACK_BDI: u16 = 0o41;
const STACK_LOWER: u64 = 0o1000;
const STACK_SIZE: u64 = 128;

/// X5 as the frame pointer: XI in H1, XM in H2.
fn frame_pointer(xi: u64, xm: u64) -> Word36 {
    Word36::ZERO.set_h1(xi).set_h2(xm)
}

fn stack_rig(program: Vec<Word36>) -> common::Rig {
    let mut rig = rig();
    rig.loader
        .load(&[BankDeclaration::code(
            "STACK",
            0,
            STACK_BDI,
            STACK_LOWER,
            vec![Word36::ZERO; STACK_SIZE as usize],
        )
        .based_on(2)])
        .expect("stack bank stages");
    load_program(&mut rig, program);
    rig
}

#[test]
fn buy_claims_a_frame() {
    let rig = stack_rig(vec![op(Opcode::BUY).x(5).bd(2, 0o123).build(), halt(0)]);
    rig.ip.write_grs(5, frame_pointer(16, STACK_LOWER + STACK_SIZE));

    run_to_stop(&rig);

    assert_eq!(rig.ip.stop_reason(), StopReason::Debug);
    assert_eq!(rig.ip.stop_detail(), 0);
    let x5 = rig.ip.read_grs(5);
    assert_eq!(x5.h1(), 16, "increment half untouched");
    assert_eq!(x5.h2(), STACK_LOWER + STACK_SIZE - 16);

    // the purchase value landed at the new top
    let stack = rig.ip.base_register(2);
    assert_eq!(stack.read(STACK_LOWER + STACK_SIZE - 16).unwrap(), Word36::new(0o123));
}

#[test]
fn buy_below_the_floor_overflows() {
    let rig = stack_rig(vec![op(Opcode::BUY).x(5).bd(2, 0).build(), halt(0)]);
    rig.ip.write_grs(5, frame_pointer(16, STACK_LOWER));

    run_to_stop(&rig);

    // no handler is configured: the fault stops the processor with the
    // class in the detail code
    assert_eq!(rig.ip.stop_reason(), StopReason::InterruptHandlerFault);
    assert_eq!(rig.ip.stop_detail(), 0o1013);
    assert_eq!(rig.ip.indicator_key().short_status(), 0);
    assert_eq!(rig.ip.indicator_key().interrupt_class(), 0o13);

    // the pointer is unchanged
    assert_eq!(rig.ip.read_grs(5).h2(), STACK_LOWER);
}

#[test]
fn sell_past_the_ceiling_underflows() {
    let rig = stack_rig(vec![op(Opcode::SELL).x(5).bd(2, 0).build(), halt(0)]);
    rig.ip.write_grs(5, frame_pointer(16, STACK_LOWER + STACK_SIZE));

    run_to_stop(&rig);

    assert_eq!(rig.ip.stop_reason(), StopReason::InterruptHandlerFault);
    assert_eq!(rig.ip.stop_detail(), 0o1013);
    assert_eq!(rig.ip.indicator_key().short_status(), 1);
    assert_eq!(rig.ip.read_grs(5).h2(), STACK_LOWER + STACK_SIZE);
}

#[test]
fn buy_then_sell_returns_the_frame() {
    let rig = stack_rig(vec![
        op(Opcode::BUY).x(5).bd(2, 0o77).build(),
        op(Opcode::SELL).a(3).x(5).bd(2, 0).build(),
        halt(0),
    ]);
    rig.ip.write_grs(5, frame_pointer(16, STACK_LOWER + STACK_SIZE));

    run_to_stop(&rig);

    assert_eq!(rig.ip.stop_reason(), StopReason::Debug);
    assert_eq!(rig.ip.read_grs(5).h2(), STACK_LOWER + STACK_SIZE);
    // SELL pops the purchased word into A3
    let a3 = komodo_vm::ip::registers::GeneralRegisterSet::a_index(3, false);
    assert_eq!(rig.ip.read_grs(a3), Word36::new(0o77));
}

const RCS_BDI: u16 = 0o42;
const RCS_LOWER: u64 = 0o2000;
const RCS_SIZE: u64 = 64;

#[test]
fn call_and_return_restore_the_environment() {
    let mut rig = rig();
    rig.loader
        .load(&[BankDeclaration::code(
            "RCS",
            0,
            RCS_BDI,
            RCS_LOWER,
            vec![Word36::ZERO; RCS_SIZE as usize],
        )
        .based_on(BR_RCS)])
        .expect("rcs bank stages");

    // 1000: CALL via the bank word at 1005
    // 1001: IAR 1            (reentry)
    // 1003: RTN              (callee)
    // 1005: target word: H1 = L,BDI of the code bank, H2 = 1003
    load_program(
        &mut rig,
        vec![
            op(Opcode::CALL).bd(0, 0o1005).build(),
            halt(1),
            Word36::ZERO,
            op(Opcode::RTN).build(),
            Word36::ZERO,
            Word36::ZERO.set_h1(pack_l_bdi(0, CODE_BDI)).set_h2(0o1003),
        ],
    );

    let rcs_empty = frame_pointer(0, RCS_LOWER + RCS_SIZE);
    rig.ip.write_grs(GRS_EX0, rcs_empty);
    rig.ip.set_access_key(komodo_types::AccessInfo::new(2, 0o31));

    let dr_before = rig.ip.designator().word();
    let key_before = rig.ip.indicator_key().access_key();

    run_to_stop(&rig);

    assert_eq!(rig.ip.stop_reason(), StopReason::Debug);
    assert_eq!(rig.ip.stop_detail(), 1, "RTN resumed at the reentry point");
    assert_eq!(rig.ip.read_grs(GRS_EX0), rcs_empty, "frame popped");
    assert_eq!(rig.ip.designator().word(), dr_before);
    assert_eq!(rig.ip.indicator_key().access_key(), key_before);
}
