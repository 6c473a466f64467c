//! A small grader for a "greeter" assignment.
//!
//! Run with `cargo run --example basic_grader`. Set `AUTOGRADER_GRAPHICAL=1` to
//! drive the graphical panel model instead of the console, or
//! `AUTOGRADER_ISOLATION=process` to run each timed test in a child process.

use autograder::capture::Console;
use autograder::{Config, builder};
use std::io::Write;
use std::time::Duration;

/// The "student submission" under test.
mod student {
    use super::*;

    pub fn greeting(name: &str) -> String {
        format!("Hello, {name}!")
    }

    pub fn count_vowels(text: &str) -> usize {
        // Off by one on purpose: 'y' is counted as a vowel.
        text.chars()
            .filter(|c| "aeiouyAEIOUY".contains(*c))
            .count()
    }

    pub fn spin_forever() -> u64 {
        let mut n = 0u64;
        loop {
            n = n.wrapping_add(1);
            std::thread::sleep(Duration::from_millis(5));
            if n == u64::MAX {
                return n;
            }
        }
    }

    pub fn main(console: &mut Console) -> i32 {
        let _ = write!(console, "What is your name? ");
        let name = console.read_line().ok().flatten().unwrap_or_default();
        let _ = writeln!(console, "{}", greeting(&name));
        if name.is_empty() {
            autograder::exit(1);
        }
        0
    }
}

fn main() -> autograder::Result<()> {
    let mut config = Config::default();
    config.grader.assignment_name = "Greeter".to_string();
    config.grader.start_message = "The vowel test is expected to fail.".to_string();
    config.grader.show_late_days = false;
    autograder::config::env::apply_env_overrides(&mut config);

    let grader = builder()
        .with_config(config)
        .describe_category("Strings", "String helpers")
        .test_default("Strings", "greeting", |ctx| {
            ctx.assert_equals("greets Ada", "Hello, Ada!", student::greeting("Ada").as_str());
            ctx.assert_not_equals("does not shout", "HELLO, ADA!", student::greeting("Ada").as_str());
            Ok(())
        })
        .test("Strings", "vowels", 1000, |ctx| {
            ctx.assert_equals("vowels in 'rhythm'", 0usize, student::count_vowels("rhythm"));
            ctx.assert_equals("vowels in 'banana'", 3usize, student::count_vowels("banana"));
            Ok(())
        })
        .test("Program", "transcript", 2000, |ctx| {
            let output = ctx.run_and_capture(student::main, "Grace\n")?;
            ctx.assert_diff(
                "console transcript",
                "What is your name? Grace\nHello, Grace!\n",
                &output,
            );
            Ok(())
        })
        .test("Program", "exits on empty name", 2000, |ctx| {
            ctx.run_and_capture(student::main, "\n")?;
            ctx.pass("program returned normally");
            Ok(())
        })
        .test("Program", "hangs", 200, |ctx| {
            let n = student::spin_forever();
            ctx.assert_true("loop finished", n > 0);
            Ok(())
        })
        .student_main(student::main)
        .callback_button("Show\nsample output", || {
            println!("What is your name? Hello, Ada!");
        })
        .build()?;

    let status = grader.main_func()?;
    std::process::exit(status);
}
