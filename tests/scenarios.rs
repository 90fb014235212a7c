//! End-to-end scenario tests: compile a small M-Script program and assert
//! structurally on the resulting assembly (no MCPC interpreter is
//! implemented here, so these check register/instruction shape rather than
//! simulate execution).

use mscr::driver::{compile, CompileOptions};
use mscr::error::CompileErrorKindHint;
use mscr::front::NoOpPreprocessor;

fn options() -> CompileOptions {
    CompileOptions { bootloader: false, optimize: true, verbose: false }
}

fn compiled(source: &str) -> String {
    compile(source, &NoOpPreprocessor, &options()).unwrap().asm
}

/// `return [1 + 2 * 3];` ends with the result in F, then copied to A and H.
#[test]
fn literal_arithmetic_respects_precedence() {
    let asm = compiled("func word main(word a, word b) { return [1 + 2 * 3]; }");
    let main_body = asm.rsplit(".mscr_function_main_params_2").next().unwrap();
    assert!(main_body.contains("MUL"), "2 * 3 should be folded before the addition");
    assert!(main_body.contains("ADD"));
    assert!(asm.contains("MOV A H"), "init asm mirrors the return value into H before halting");
}

#[test]
fn global_read_modify_write_round_trips_through_the_data_section() {
    let source = "global word g = 5;\nfunc word main(word a, word b) {\n  g = [g + 1];\n  return g;\n}\n";
    let asm = compiled(source);
    assert!(asm.contains("0x0005"), "the data section should seed g's initial value");
    assert!(asm.contains("STOR"), "writing g must go back through memory, not just a register");
}

#[test]
fn function_calls_use_the_arity_qualified_label() {
    let source = "func word add(word x, word y) { return [x + y]; }\nfunc word main(word a, word b) { return add(40, 2); }\n";
    let asm = compiled(source);
    assert!(asm.contains(".mscr_function_add_params_2 __LABEL_SET"));
    assert!(asm.contains("CALL .mscr_function_add_params_2"));
}

#[test]
fn address_of_and_store_through_pointer() {
    let source = "global word cell = 0;\nfunc word main(word a, word b) {\n  word p = [$$(cell)];\n  $$([p], 99);\n  return cell;\n}\n";
    let asm = compiled(source);
    assert!(asm.contains("STOR"), "storing through the pointer must emit a real STOR");
}

#[test]
fn while_loop_lowers_to_a_labelled_back_edge() {
    let source = "func word main(word a, word b) {\n  word i = 0;\n  word s = 0;\n  while [i < 10] {\n    s = [s + i];\n    i = [i + 1];\n  }\n  return s;\n}\n";
    let asm = compiled(source);
    assert!(asm.contains(".mscr_while_start_1 __LABEL_SET"));
    assert!(asm.contains(".mscr_while_end_1 __LABEL_SET"));
    assert!(asm.contains("JMPEZ .mscr_while_end_1"));
    assert!(asm.contains("JMP .mscr_while_start_1"));
}

#[test]
fn struct_member_access_resolves_to_offset_addressing() {
    let source = "struct Pair { word a; word b; }\nfunc word main(word argc, word argp) {\n  Pair p;\n  p.a = 3;\n  p.b = 4;\n  return [p.a + p.b];\n}\n";
    let asm = compiled(source);
    assert!(asm.contains("ADD"));
}

#[test]
#[should_panic(expected = "void function in a calc context")]
fn calling_a_void_function_from_calc_context_is_fatal() {
    let source = "func void f() { }\nfunc word main(word a, word b) { return [f()]; }\n";
    let _ = compile(source, &NoOpPreprocessor, &options());
}

#[test]
fn redefining_a_global_is_a_compile_error() {
    let source = "global word g = 1;\nglobal word g = 2;\nfunc word main(word a, word b) { return g; }\n";
    let err = compile(source, &NoOpPreprocessor, &options()).unwrap_err();
    assert_eq!(err.kind(), CompileErrorKindHint::Redefinition);
}

#[test]
fn missing_entry_point_is_a_compile_error() {
    let source = "func word notmain(word a, word b) { return [1]; }\n";
    let err = compile(source, &NoOpPreprocessor, &options()).unwrap_err();
    assert_eq!(err.kind(), CompileErrorKindHint::MissingEntryPoint);
}

#[test]
fn struct_valued_parameters_are_a_compile_error() {
    let source = "func word f(Pair p) { return [1]; }\nfunc word main(word a, word b) { return [1]; }\nstruct Pair { word a; word b; }\n";
    let err = compile(source, &NoOpPreprocessor, &options()).unwrap_err();
    assert_eq!(err.kind(), CompileErrorKindHint::Type);
}

#[test]
fn reg_assign_rejects_a_global() {
    let source = "global word g = 0;\nfunc word main(word a, word b) {\n  _reg_assign(0, g);\n  _asm { SETREG A 0x5 };\n  return a;\n}\n";
    let err = compile(source, &NoOpPreprocessor, &options()).unwrap_err();
    assert_eq!(err.kind(), CompileErrorKindHint::SpecialFunctionMisuse);
}

#[test]
fn bootloader_mode_emits_the_rom_copy_preamble() {
    let source = "func word main(word a, word b) { return [1]; }\n";
    let opts = CompileOptions { bootloader: true, optimize: true, verbose: false };
    let asm = compile(source, &NoOpPreprocessor, &opts).unwrap().asm;
    assert!(asm.contains(".mscr_init_bootloader __LABEL_SET"));
}

#[test]
fn optimizer_disable_keeps_push_pop_pairs_around() {
    let source = "func word main(word a, word b) { return [1 + 2]; }\n";
    let opts = CompileOptions { bootloader: false, optimize: false, verbose: false };
    let asm = compile(source, &NoOpPreprocessor, &opts).unwrap().asm;
    assert!(asm.contains("PUSH"));
}
