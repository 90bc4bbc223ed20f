//! Instruction execution scenarios: partial words, arithmetic flags,
//! conditional skips and the system-call surface.

mod common;

use std::sync::Arc;

use common::{halt, load_program, op, rig, run_to_stop, CODE_LOWER};
use komodo_types::Word36;
use komodo_vm::ip::registers::GeneralRegisterSet;
use komodo_vm::ip::{DesignatorRegister, Opcode, StopReason};
use komodo_vm::sp::SystemProcessor;

fn a(n: usize) -> usize {
    GeneralRegisterSet::a_index(n, false)
}

#[test]
fn load_store_partial_words() {
    let data = CODE_LOWER + 8;
    let mut rig = rig();
    load_program(
        &mut rig,
        vec![
            op(Opcode::LA).a(1).j(0o2).bd(0, data).build(),  // A1 <- H1(U)
            op(Opcode::LA).a(2).j(0o15).bd(0, data).build(), // A2 <- S1(U)
            op(Opcode::SA).a(1).j(0o1).bd(0, data + 1).build(), // H2(U+1) <- A1
            halt(0),
            Word36::ZERO,
            Word36::ZERO,
            Word36::ZERO,
            Word36::ZERO,
            Word36::new(0o123456_700000), // data word
            Word36::ZERO,                 // store target
        ],
    );

    run_to_stop(&rig);

    assert_eq!(rig.ip.read_grs(a(1)), Word36::new(0o123456));
    assert_eq!(rig.ip.read_grs(a(2)), Word36::new(0o12));
    assert_eq!(rig.ip.base_register(0).read(data + 1).unwrap(), Word36::new(0o123456));
}

#[test]
fn immediate_operands_need_no_storage() {
    let mut rig = rig();
    load_program(
        &mut rig,
        vec![
            op(Opcode::LA).a(0).j(0o16).bd(0, 0o765).build(), // A0 <- U
            op(Opcode::LNA).a(1).j(0o16).bd(0, 5).build(),    // A1 <- -U
            halt(0),
        ],
    );

    run_to_stop(&rig);

    assert_eq!(rig.ip.read_grs(a(0)), Word36::new(0o765));
    assert_eq!(rig.ip.read_grs(a(1)), Word36::from_i64(-5));
}

#[test]
fn index_modification_and_incrementation() {
    let data = CODE_LOWER + 4;
    let mut rig = rig();
    load_program(
        &mut rig,
        vec![
            // U = d + X3.XM, then X3.XM += X3.XI
            op(Opcode::LA).a(0).x(3).h(true).bd(0, data).build(),
            op(Opcode::LA).a(1).x(3).bd(0, data).build(),
            halt(0),
            Word36::ZERO,
            Word36::new(0o11), // data + 0
            Word36::new(0o22), // data + 1
            Word36::new(0o33), // data + 2
        ],
    );
    rig.ip.write_grs(3, Word36::ZERO.set_h1(2).set_h2(0));

    run_to_stop(&rig);

    assert_eq!(rig.ip.read_grs(a(0)), Word36::new(0o11));
    assert_eq!(rig.ip.read_grs(3).h2(), 2, "XI added into XM once");
    assert_eq!(rig.ip.read_grs(a(1)), Word36::new(0o33));
}

#[test]
fn ones_complement_add_sets_designators() {
    let mut rig = rig();
    load_program(
        &mut rig,
        vec![
            op(Opcode::AA).a(0).j(0o16).bd(0, 2).build(), // A0 += 2
            halt(0),
        ],
    );
    rig.ip.write_grs(a(0), Word36::from_i64(-1));

    run_to_stop(&rig);

    // -1 + 2 = 1 with end-around carry, no overflow
    assert_eq!(rig.ip.read_grs(a(0)), Word36::from_i64(1));
    assert!(rig.ip.designator().carry());
    assert!(!rig.ip.designator().overflow());
}

#[test]
fn test_even_parity_skips() {
    let mut rig = rig();
    load_program(
        &mut rig,
        vec![
            op(Opcode::TEP).a(0).j(0o16).bd(0, 0o3).build(), // A0 & 3 has two bits: even, skip
            halt(7),                                         // skipped
            halt(1),
        ],
    );
    rig.ip.write_grs(a(0), Word36::new(0o777));

    run_to_stop(&rig);
    assert_eq!(rig.ip.stop_detail(), 1);
}

#[test]
fn tlem_increments_once_when_a_names_x() {
    let mut rig = rig();
    load_program(
        &mut rig,
        vec![
            // F0.h set with a == x: the resolution increment is the only one
            op(Opcode::TLEM).a(4).x(4).h(true).j(0o16).bd(0, 0).build(),
            halt(7), // skipped: U <= XM
            halt(0),
        ],
    );
    rig.ip.write_grs(4, Word36::ZERO.set_h1(0o10).set_h2(0o200));

    run_to_stop(&rig);

    assert_eq!(rig.ip.stop_detail(), 0, "condition met, next instruction skipped");
    assert_eq!(rig.ip.read_grs(4).h2(), 0o210, "incremented exactly once");
    assert_eq!(rig.ip.read_grs(4).h1(), 0o10);
}

#[test]
fn jgd_counts_a_loop() {
    let mut rig = rig();
    // JGD register index is (j.low3 << 4) | a; j=1, a=7 names GRS 0o27
    let index = 0o27_usize;
    load_program(
        &mut rig,
        vec![
            op(Opcode::ADD1).j(0).bd(0, CODE_LOWER + 4).build(), // count iterations
            op(Opcode::JGD).j(1).a(7).bd(0, CODE_LOWER).build(),
            halt(0),
            Word36::ZERO,
            Word36::ZERO, // iteration counter
        ],
    );
    rig.ip.write_grs(index, Word36::from_i64(3));

    run_to_stop(&rig);

    // 3, 2, 1 jump; 0 falls through; the loop body ran four times
    assert_eq!(rig.ip.base_register(0).read(CODE_LOWER + 4).unwrap(), Word36::from_i64(4));
    assert_eq!(rig.ip.read_grs(index), Word36::from_i64(-1));
}

#[test]
fn double_normalize_writes_count() {
    let data = CODE_LOWER + 3;
    let mut rig = rig();
    load_program(
        &mut rig,
        vec![
            op(Opcode::DLSC).a(0).bd(0, data).build(),
            halt(0),
            Word36::ZERO,
            Word36::ZERO,    // data: high word
            Word36::new(1),  // data + 1: low word
        ],
    );

    run_to_stop(&rig);

    assert_eq!(rig.ip.read_grs(a(2)), Word36::new(70));
    let normalized_high = rig.ip.read_grs(a(0));
    assert_eq!(normalized_high.bits() >> 34, 0b01);
}

#[test]
fn quarter_word_load_selects_by_x() {
    let data = CODE_LOWER + 2;
    let mut rig = rig();
    load_program(
        &mut rig,
        vec![
            op(Opcode::LAQW).a(0).x(5).bd(0, data).build(),
            halt(0),
            Word36::ZERO.set_q1(0o101).set_q2(0o202).set_q3(0o303).set_q4(0o404),
        ],
    );
    // X5.S1 = 2 selects Q3
    rig.ip.write_grs(5, Word36::ZERO.set_s1(2));

    run_to_stop(&rig);
    assert_eq!(rig.ip.read_grs(a(0)), Word36::new(0o303));
}

#[test]
fn sysc_reads_jump_keys_from_the_system_processor() {
    let packet = CODE_LOWER + 2;
    let mut rig = rig();
    load_program(
        &mut rig,
        vec![
            op(Opcode::SYSC).bd(0, packet).build(),
            halt(0),
            Word36::ZERO.set_s1(0o5), // subfunction: jump keys read
            Word36::ZERO,             // reply word
        ],
    );

    let sp = Arc::new(SystemProcessor::new("SP0", &rig.fabric));
    sp.set_jump_key(1, true);
    sp.set_jump_key(36, true);
    rig.ip.attach_system_processor(Arc::clone(&sp));

    run_to_stop(&rig);

    let code = rig.ip.base_register(0);
    assert_eq!(code.read(packet).unwrap().s2(), 0, "status ok");
    assert_eq!(code.read(packet + 1).unwrap(), Word36::new(0o400000_000001));
}

#[test]
fn privileged_instruction_faults_at_low_privilege() {
    let mut rig = rig();
    load_program(&mut rig, vec![op(Opcode::SPD).bd(0, CODE_LOWER + 2).build(), halt(0), Word36::ZERO]);
    rig.ip
        .update_designator(|dr| dr.set_processor_privilege(3));

    run_to_stop(&rig);

    // InvalidInstruction with no handler configured stops the processor
    assert_eq!(rig.ip.stop_reason(), StopReason::InterruptHandlerFault);
    assert_eq!(rig.ip.stop_detail(), 0o1016);
}

#[test]
fn hltj_leaves_the_target_in_the_counter() {
    let mut rig = rig();
    load_program(&mut rig, vec![op(Opcode::HLTJ).bd(0, CODE_LOWER + 5).build(), halt(7)]);

    run_to_stop(&rig);

    assert_eq!(rig.ip.stop_reason(), StopReason::HaltJump);
    assert_eq!(rig.ip.program_address().pc(), CODE_LOWER + 5);
}

#[test]
fn quarter_word_mode_remaps_j_codes() {
    let data = CODE_LOWER + 2;
    let mut rig = rig();
    load_program(
        &mut rig,
        vec![
            op(Opcode::LA).a(0).j(0o7).bd(0, data).build(), // QWM: Q4
            halt(0),
            Word36::ZERO.set_t1(0o1111).set_q4(0o55),
        ],
    );
    rig.ip
        .update_designator(|dr| dr.set_db(DesignatorRegister::DB_QUARTER_WORD_MODE, true));

    run_to_stop(&rig);
    assert_eq!(rig.ip.read_grs(a(0)), Word36::new(0o55));
}
