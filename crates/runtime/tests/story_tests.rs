//! End-to-end story execution tests.

use ink_runtime::{CompileError, Flags, InkError, Story, StoryError};

fn load(text: &str) -> Story {
    let mut story = Story::open();
    story.load(text, Flags::empty()).expect("story loads");
    story
}

fn load_flags(text: &str, flags: Flags) -> Story {
    let mut story = Story::open();
    story.load(text, flags).expect("story loads");
    story
}

/// Drain every available line.
fn drain(story: &mut Story) -> Vec<String> {
    let mut lines = Vec::new();

    while story.can_continue() {
        if let Some(line) = story.continue_story().expect("clean run") {
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
    }
    lines
}

#[test]
fn s1_hello_world() {
    let mut story = load("Hello, world!\n");

    let line = story.continue_story().unwrap();
    assert_eq!(line, Some("Hello, world!"));
    assert!(!story.can_continue());
}

#[test]
fn s2_expression_only_story_terminates_cleanly() {
    let mut story = load("~ 1 + 2 * 3\n");

    let line = story.continue_story().unwrap();
    assert!(line.is_none() || line == Some(""));
    assert!(!story.can_continue());
}

#[test]
fn s3_choices_in_order() {
    let mut story = load("* Go north\n* Go south\n");

    // No content before the decision point.
    while story.can_continue() {
        story.continue_story().unwrap();
    }

    let texts: Vec<String> = story.choices().map(|c| c.text.to_string()).collect();
    assert_eq!(texts, vec!["Go north", "Go south"]);

    story.choose(0).unwrap();
    let lines = drain(&mut story);
    assert_eq!(lines, vec!["Go north"]);
    assert_eq!(story.choice_count(), 0);
}

#[test]
fn s4_conditional_content_true_branch() {
    let mut story = load("{true: yes|no}\n");

    assert_eq!(drain(&mut story), vec!["yes"]);
}

#[test]
fn s4_conditional_content_false_branch() {
    let mut story = load("{false: yes|no}\n");

    assert_eq!(drain(&mut story), vec!["no"]);
}

#[test]
fn s5_variable_assignment_and_print() {
    let mut story = load("VAR x = 2\n~ x = x + 1\n{x}\n");

    assert_eq!(drain(&mut story), vec!["3"]);
}

#[test]
fn s6_redefinition_is_a_load_error() {
    let mut story = Story::open();
    let err = story.load("VAR x\nVAR x\n", Flags::empty()).unwrap_err();

    match err {
        StoryError::Compile(CompileError::Parse { rendered, .. }) => {
            assert!(rendered.contains(":2:5: error: redefinition of 'x'"));
        }
        other => panic!("expected a compile failure, got {:?}", other),
    }
    assert!(!story.can_continue());
}

#[test]
fn numeric_literals_round_trip_through_output() {
    for literal in ["0", "7", "42", "1.5", "0.125", "123456"] {
        let mut story = load(&format!("{{{}}}\n", literal));
        let lines = drain(&mut story);

        assert_eq!(lines.len(), 1, "literal {}", literal);
        let parsed: f64 = lines[0].parse().expect("numeric output");
        let expected: f64 = literal.parse().unwrap();
        assert_eq!(parsed, expected, "literal {}", literal);
    }
}

#[test]
fn knots_and_diverts() {
    let mut story = load("Intro.\n-> cave\n== cave ==\nIt is dark.\n-> END\n");

    assert_eq!(drain(&mut story), vec!["Intro.", "It is dark."]);
}

#[test]
fn stitch_diverts_resolve_short_and_dotted() {
    let text = "\
-> cave.entrance
== cave ==
-> entrance
= entrance
A heavy door.
-> END
";
    let mut story = load(text);
    assert_eq!(drain(&mut story), vec!["A heavy door."]);
}

#[test]
fn functions_return_values_into_content() {
    let text = "\
{add(1, 2)}
== function add(a, b)
~ return a + b
";
    let mut story = load(text);
    assert_eq!(drain(&mut story), vec!["3"]);
}

#[test]
fn temp_variables_are_frame_local() {
    let text = "\
{double(21)}
== function double(n)
~ temp result = n * 2
~ return result
";
    let mut story = load(text);
    assert_eq!(drain(&mut story), vec!["42"]);
}

#[test]
fn tunnels_return_to_the_call_site() {
    let text = "\
-> shop ->
After the shop.
== shop ==
Buying supplies.
->->
";
    let mut story = load(text);
    assert_eq!(drain(&mut story), vec!["Buying supplies.", "After the shop."]);
}

#[test]
fn threads_include_content_and_come_back() {
    let text = "\
<- ambience
The main scene.
== ambience ==
Rain taps the windows.
";
    let mut story = load(text);
    assert_eq!(
        drain(&mut story),
        vec!["Rain taps the windows.", "The main scene."]
    );
}

#[test]
fn glue_joins_adjacent_lines() {
    let mut story = load("Some <>\ncontent\n");
    let lines = drain(&mut story);

    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0], "Somecontent");
}

#[test]
fn divert_mid_line_joins_with_target() {
    let text = "\
We hurried home -> home
== home ==
to Savile Row.
";
    let mut story = load(text);
    let lines = drain(&mut story);

    assert_eq!(lines, vec!["We hurried hometo Savile Row."]);
}

#[test]
fn switch_selects_matching_case() {
    let text = "\
VAR x = 1
{x:
- 0: zero
- 1: one
- else: many
}
";
    let mut story = load(text);
    assert_eq!(drain(&mut story), vec!["one"]);
}

#[test]
fn switch_falls_back_to_else() {
    let text = "\
VAR x = 9
{x:
- 0: zero
- 1: one
- else: many
}
";
    let mut story = load(text);
    assert_eq!(drain(&mut story), vec!["many"]);
}

#[test]
fn multiline_conditional_with_else() {
    let text = "\
VAR x = 0
{x > 1:
big
- else:
small
}
";
    let mut story = load(text);
    assert_eq!(drain(&mut story), vec!["small"]);
}

#[test]
fn stopping_sequence_sticks_on_last() {
    let text = "\
-> loop
== loop ==
{first|second|third}
+ [Again] -> loop
";
    let mut story = load(text);
    let mut seen = Vec::new();

    for _ in 0..4 {
        seen.extend(drain(&mut story));
        assert_eq!(story.choice_count(), 1);
        story.choose(0).unwrap();
    }
    assert_eq!(seen, vec!["first", "second", "third", "third"]);
}

#[test]
fn cycle_sequence_wraps_around() {
    let text = "\
-> loop
== loop ==
{&tick|tock}
+ [Again] -> loop
";
    let mut story = load(text);
    let mut seen = Vec::new();

    for _ in 0..4 {
        seen.extend(drain(&mut story));
        story.choose(0).unwrap();
    }
    assert_eq!(seen, vec!["tick", "tock", "tick", "tock"]);
}

#[test]
fn once_sequence_goes_quiet() {
    let text = "\
-> loop
== loop ==
{!only once}
+ [Again] -> loop
";
    let mut story = load(text);
    let mut seen = Vec::new();

    for _ in 0..3 {
        seen.extend(drain(&mut story));
        story.choose(0).unwrap();
    }
    assert_eq!(seen, vec!["only once"]);
}

#[test]
fn shuffle_sequence_picks_a_listed_alternative() {
    let mut story = load("{~red|green|blue}\n");
    let lines = drain(&mut story);

    assert_eq!(lines.len(), 1);
    assert!(["red", "green", "blue"].contains(&lines[0].as_str()));
}

#[test]
fn once_only_choices_disappear_after_use() {
    let text = "\
-> hub
== hub ==
* [Read the letter] -> hub
+ [Wait] -> hub
";
    let mut story = load(text);

    drain(&mut story);
    assert_eq!(story.choice_count(), 2);
    assert_eq!(story.choice_text(0), Some("Read the letter"));

    story.choose(0).unwrap();
    drain(&mut story);
    assert_eq!(story.choice_count(), 1);
    assert_eq!(story.choice_text(0), Some("Wait"));
}

#[test]
fn sticky_choices_persist() {
    let text = "\
-> hub
== hub ==
+ [Wait] -> hub
";
    let mut story = load(text);

    for _ in 0..3 {
        drain(&mut story);
        assert_eq!(story.choice_count(), 1);
        story.choose(0).unwrap();
    }
}

#[test]
fn gather_collects_every_branch() {
    let text = "\
* Left
* Right
- Either way, onwards.
";
    for index in 0..2 {
        let mut story = load(text);

        drain(&mut story);
        story.choose(index).unwrap();

        let lines = drain(&mut story);
        assert_eq!(lines.last().map(String::as_str), Some("Either way, onwards."));
    }
}

#[test]
fn invalid_choice_index_is_rejected() {
    let mut story = load("* Only option\n");

    drain(&mut story);
    let err = story.choose(5).unwrap_err();
    assert!(matches!(
        err,
        StoryError::Runtime(InkError::InvalidChoice(5))
    ));

    // The valid index still works afterwards.
    story.choose(0).unwrap();
}

#[test]
fn call_stack_overflow_is_reported() {
    let text = "\
{runaway(0)}
== function runaway(n)
~ return runaway(n + 1)
";
    let mut story = load(text);
    let mut result = Ok(());

    while story.can_continue() {
        if let Err(err) = story.continue_story() {
            result = Err(err);
            break;
        }
    }
    assert!(matches!(
        result,
        Err(StoryError::Runtime(InkError::StackOverflow))
    ));
    assert!(!story.can_continue());
}

#[test]
fn arithmetic_on_strings_is_a_runtime_error() {
    let mut story = load("~ \"text\" + 1\n");
    let mut result = Ok(());

    while story.can_continue() {
        if let Err(err) = story.continue_story() {
            result = Err(err);
            break;
        }
    }
    assert!(matches!(
        result,
        Err(StoryError::Runtime(InkError::InvalidArgument(_)))
    ));
}

#[test]
fn continue_before_load_is_rejected() {
    let mut story = Story::open();

    assert!(!story.can_continue());
    assert!(matches!(
        story.continue_story(),
        Err(StoryError::NotLoaded)
    ));
}

#[test]
fn gc_stress_run_produces_identical_output() {
    let text = "\
VAR total = 0
-> loop
== loop ==
~ total = total + step(total)
{total}
+ [More] -> loop
== function step(n)
~ temp bump = n + 1
~ return bump
";
    let run = |flags: Flags| {
        let mut story = load_flags(text, flags);
        let mut lines = Vec::new();

        for _ in 0..6 {
            lines.extend(drain(&mut story));
            story.choose(0).unwrap();
        }
        lines
    };

    let plain = run(Flags::empty());
    let stressed = run(Flags::GC_ENABLE | Flags::GC_STRESS);
    assert_eq!(plain, stressed);
    assert_eq!(plain[0], "1");
    assert!(plain.len() >= 6);
}

#[test]
fn collection_reclaims_transient_objects() {
    let text = "\
-> loop
== loop ==
~ temp scratch = 1 + 2 * 3 - 4
{scratch}
+ [Again] -> loop
";
    let mut story = load_flags(text, Flags::GC_ENABLE);

    drain(&mut story);
    story.collect_garbage();
    let baseline = story.live_objects();

    for _ in 0..50 {
        story.choose(0).unwrap();
        drain(&mut story);
    }

    story.collect_garbage();
    let after = story.live_objects();

    // Transient arithmetic results from 50 iterations must not pile up.
    assert!(
        after <= baseline + 8,
        "live objects grew from {} to {}",
        baseline,
        after
    );
}

#[test]
fn reachable_objects_survive_stress_collection() {
    let text = "\
VAR keep = 123.5
-> loop
== loop ==
{keep}
+ [Again] -> loop
";
    let mut story = load_flags(text, Flags::GC_ENABLE | Flags::GC_STRESS);

    for _ in 0..5 {
        let lines = drain(&mut story);
        assert_eq!(lines, vec!["123.5"]);
        story.choose(0).unwrap();
    }
}

#[test]
fn end_divert_stops_everything() {
    let mut story = load("Before.\n-> END\n== unreachable ==\nNever.\n");

    assert_eq!(drain(&mut story), vec!["Before."]);
    assert!(!story.can_continue());
}

#[test]
fn list_elements_act_as_ordinal_constants() {
    let mut story = load("LIST moods = calm, tense, furious\n{tense}\n");

    assert_eq!(drain(&mut story), vec!["2"]);
}

#[test]
fn booleans_print_and_compare() {
    let mut story = load("{1 < 2}\n{2 < 1}\n");

    assert_eq!(drain(&mut story), vec!["true", "false"]);
}

#[test]
fn logical_operators_combine_truthiness() {
    let mut story = load("{1 and 0: both|not both}\n{0 or 3: either|neither}\n");

    assert_eq!(drain(&mut story), vec!["not both", "either"]);
}
