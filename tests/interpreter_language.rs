//! Integration tests for the built-in interpreter
//!
//! Runs small lesson-style programs end to end and checks their output and
//! fault rendering.

use pyground::interpreter::{ErrorKind, EvaluatorLimits, run_to_string};

fn run(source: &str) -> String {
    run_to_string(source, EvaluatorLimits::default()).unwrap()
}

fn fail(source: &str) -> String {
    run_to_string(source, EvaluatorLimits::default())
        .unwrap_err()
        .to_string()
}

#[test]
fn test_variables_and_printing() {
    let out = run("name = 'Ada'\nage = 36\nprint('Name:', name, 'Age:', age)\nprint(1, 2, 3, sep='-', end='!\\n')\n");
    assert_eq!(out, "Name: Ada Age: 36\n1-2-3!\n");
}

#[test]
fn test_no_output_program() {
    assert_eq!(run("x = 1\ny = x + 1\n"), "");
}

#[test]
fn test_control_flow() {
    let source = "\
total = 0
for n in range(1, 11):
    if n % 2 == 0:
        continue
    if n > 7:
        break
    total += n
print(total)
i = 3
while i > 0:
    print(i)
    i -= 1
";
    assert_eq!(run(source), "16\n3\n2\n1\n");
}

#[test]
fn test_conditional_chain() {
    let source = "\
def grade(score):
    if score >= 90:
        return 'A'
    elif score >= 80:
        return 'B'
    else:
        return 'C'
print(grade(95), grade(85), grade(10))
print('even' if 4 % 2 == 0 else 'odd')
print(1 < 2 < 3, 3 > 2 > 5)
";
    assert_eq!(run(source), "A B C\neven\nTrue False\n");
}

#[test]
fn test_collections() {
    let source = "\
fruits = ['apple', 'banana']
fruits.append('cherry')
fruits.insert(0, 'kiwi')
print(fruits, len(fruits))
print(fruits.pop(), fruits)
point = (3, 4)
x, y = point
print(x * y, point)
ages = {'alice': 30}
ages['bob'] = 25
print(ages, ages.get('carol', 0))
for key, value in ages.items():
    print(key, value)
print('alice' in ages, 'zoe' not in ages)
";
    assert_eq!(
        run(source),
        "['kiwi', 'apple', 'banana', 'cherry'] 4\n\
         cherry ['kiwi', 'apple', 'banana']\n\
         12 (3, 4)\n\
         {'alice': 30, 'bob': 25} 0\n\
         alice 30\n\
         bob 25\n\
         True True\n"
    );
}

#[test]
fn test_string_methods_and_formatting() {
    let source = "\
s = '  Hello, World  '
print(s.strip().upper(), s.strip().lower())
print('-'.join(['a', 'b', 'c']), 'a,b,c'.split(','))
print('banana'.replace('a', 'o'), 'banana'.count('a'), 'banana'.find('n'))
price = 3.14159
print(f'{price:.2f} {42:>5} {7:03d} {0.25:.0%}')
print('{} + {} = {}'.format(1, 2, 3))
";
    assert_eq!(
        run(source),
        "HELLO, WORLD hello, world\n\
         a-b-c ['a', 'b', 'c']\n\
         bonono 3 2\n\
         3.14    42 007 25%\n\
         1 + 2 = 3\n"
    );
}

#[test]
fn test_builtins() {
    let source = "\
nums = [5, 3, 8, 1]
print(sum(nums), min(nums), max(nums), sorted(nums), sorted(nums, reverse=True))
print(list(enumerate(['a', 'b'], 1)), list(zip([1, 2], ['x', 'y'])))
print(abs(-4), round(2.675, 2), int('12') + 1, float('1.5'), str(10) + '!')
print(type(1), isinstance(1.0, float), list(range(0, 10, 3)))
print([n * n for n in nums if n > 2])
";
    assert_eq!(
        run(source),
        "17 1 8 [1, 3, 5, 8] [8, 5, 3, 1]\n\
         [(1, 'a'), (2, 'b')] [(1, 'x'), (2, 'y')]\n\
         4 2.67 13 1.5 10!\n\
         <class 'int'> True [0, 3, 6, 9]\n\
         [25, 9, 64]\n"
    );
}

#[test]
fn test_exceptions_are_catchable() {
    let source = "\
def check(age):
    if age < 0:
        raise ValueError('age cannot be negative')
    return age
try:
    check(-1)
except ValueError as e:
    print('caught:', e)
try:
    {}['missing']
except KeyError as e:
    print('missing key', e)
";
    assert_eq!(
        run(source),
        "caught: age cannot be negative\nmissing key 'missing'\n"
    );
}

#[test]
fn test_uncaught_faults_render_kind_message_and_line() {
    assert_eq!(fail("print(undefined_name)"), "NameError: name 'undefined_name' is not defined on line 1");
    assert_eq!(fail("x = 1\ny = 'a' + x\n"), "TypeError: can only concatenate str (not \"int\") to str on line 2");
    assert_eq!(fail("print(10 / 0)"), "ZeroDivisionError: division by zero on line 1");
    assert_eq!(fail("import math"), "ModuleNotFoundError: No module named 'math' on line 1");
    assert_eq!(fail("input('name? ')"), "EOFError: EOF when reading a line on line 1");
}

#[test]
fn test_fault_inside_function_reports_inner_line() {
    let err = run_to_string(
        "def broken():\n    return [1][5]\n\nbroken()\n",
        EvaluatorLimits::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::IndexError);
    assert_eq!(err.line, Some(2));
}

#[test]
fn test_syntax_error_is_reported_before_running() {
    let err = run_to_string("print('first')\nif True\n    print('x')\n", EvaluatorLimits::default())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert_eq!(err.line, Some(2));
}

#[test]
fn test_step_limit_stops_infinite_loop() {
    let limits = EvaluatorLimits::default().with_step_limit(1_000);
    let err = run_to_string("n = 0\nwhile True:\n    n += 1\n", limits).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TimeoutError);
}

#[test]
fn test_lambda_dict_comprehension_slices_and_del() {
    let source = "\
scores = {'ada': 91, 'bob': 78, 'cy': 85}
ranked = sorted(scores.items(), key=lambda item: item[1], reverse=True)
print(ranked[0][0], [name for name, _ in ranked][::-1])
passed = {name: score >= 80 for name, score in scores.items()}
print(passed)
word = 'level'
print(word == word[::-1], 'python'[1::2])
del scores['bob']
print(scores, len(scores))
";
    assert_eq!(
        run(source),
        "ada ['bob', 'cy', 'ada']\n\
         {'ada': True, 'bob': False, 'cy': True}\n\
         True yhn\n\
         {'ada': 91, 'cy': 85} 2\n"
    );
}

#[test]
fn test_round_follows_decimal_rounding() {
    assert_eq!(
        run("print(round(2.675, 2), round(1234, -2), round(1250, -2), round(2.5), round(0.5))\n"),
        "2.67 1200 1200 2 0\n"
    );
}

#[test]
fn test_bracket_nesting_limit() {
    // The call's own parenthesis counts towards the limit of 200.
    let ok = format!("print({}1{})\n", "(".repeat(199), ")".repeat(199));
    assert_eq!(run(&ok), "1\n");
    let too_deep = format!("print({}1{})\n", "(".repeat(200), ")".repeat(200));
    assert_eq!(
        fail(&too_deep),
        "SyntaxError: too many nested parentheses on line 1"
    );
}

#[test]
fn test_cyclic_equality_raises_catchable_recursion_error() {
    let source = "\
a = []
a.append(a)
b = []
b.append(b)
try:
    print(a == b)
except RecursionError as e:
    print('caught:', e)
a.append(a)
a.append(a)
print(a)
";
    assert_eq!(
        run(source),
        "caught: maximum recursion depth exceeded in comparison\n[[...], [...], [...]]\n"
    );
}

#[test]
fn test_range_extremes_raise_overflow_error() {
    assert_eq!(
        fail("r = range(-9223372036854775807 - 1, 9223372036854775807)\nprint(len(r))\n"),
        "OverflowError: Python int too large to convert to C ssize_t on line 2"
    );
    assert_eq!(
        run("r = range(-9223372036854775807 - 1, 9223372036854775807)\nprint(r[-1], 5 in r)\n"),
        "9223372036854775806 True\n"
    );
    assert_eq!(
        run("print('a,b,c'.split(',', 9223372036854775807))\n"),
        "['a', 'b', 'c']\n"
    );
}

#[test]
fn test_huge_format_width_is_catchable() {
    let source = "\
try:
    print('{:>99999999999}'.format(1))
except ValueError as e:
    print('caught:', e)
";
    assert_eq!(run(source), "caught: Too many decimal digits in format string\n");
}

#[test]
fn test_default_recursion_depth() {
    let source = "\
def countdown(n):
    if n == 0:
        return 'done'
    return countdown(n - 1)
print(countdown(100), countdown(900))
";
    assert_eq!(run(source), "done done\n");
    let err = run_to_string("def f():\n    return f()\nf()\n", EvaluatorLimits::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RecursionError);
    assert_eq!(err.line, Some(2));
}

#[test]
fn test_reference_card_snippets() {
    let source = "\
square = lambda x: x**2
words = ['hi', 'hello']
lengths = {word: len(word) for word in words}
print(square(7), lengths)
";
    assert_eq!(run(source), "49 {'hi': 2, 'hello': 5}\n");
}
