//! Example programs offered by the playground
//!
//! Every snippet sticks to what the built-in backend supports, so none of
//! them import modules.

use serde::Serialize;

/// A titled example program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snippet {
    /// Title shown in the picker
    pub title: &'static str,
    /// Program text loaded into the editor
    pub code: &'static str,
}

/// Playground examples in display order. The first is loaded by default.
pub const SNIPPETS: &[Snippet] = &[
    Snippet {
        title: "Hello Python",
        code: r#"# Welcome to Python!
print("Hello, Python World!")

# Variables and types
name = "Python Learner"
age = 25
is_learning = True

print(f"My name is {name}, I'm {age} years old")
print(f"Am I learning Python? {is_learning}")

# Lists and loops
fruits = ["apple", "banana", "cherry"]
for fruit in fruits:
    print(f"I like {fruit}s")
"#,
    },
    Snippet {
        title: "Data Structures",
        code: r#"# Python data structures in action
student = {
    "name": "Alice",
    "grades": [85, 92, 78, 95],
    "subjects": ["Math", "Science", "English", "History"]
}

# Calculate average grade
average = sum(student["grades"]) / len(student["grades"])
print(f"{student['name']}'s average grade: {average:.1f}")

# List comprehension
high_grades = [grade for grade in student["grades"] if grade >= 90]
print(f"High grades (90+): {high_grades}")

# Counting words with a dictionary
text = "python programming is fun and python is powerful"
word_count = {}
for word in text.split():
    word_count[word] = word_count.get(word, 0) + 1

def by_count(pair):
    return pair[1]

print("Word frequencies:", sorted(word_count.items(), key=by_count, reverse=True)[:3])
"#,
    },
    Snippet {
        title: "Web API Example",
        code: r#"# Simulated API request (using mock data)
def mock_api_call():
    return {
        "status": "success",
        "data": {
            "weather": "sunny",
            "temperature": 75,
            "location": "Python City"
        }
    }

# Process API response
response = mock_api_call()
print("API Response:")
for key, value in response["data"].items():
    print(f"  {key}: {value}")

if response["status"] == "success":
    data = response["data"]
    print(f"Weather in {data['location']}: {data['weather']}")
    print(f"Temperature: {data['temperature']}°F")
else:
    print("API request failed")
"#,
    },
    Snippet {
        title: "File Processing",
        code: r#"# File processing simulation
csv_data = """name,age,city,salary
Alice,25,New York,75000
Bob,30,San Francisco,85000
Charlie,35,Chicago,70000
Diana,28,Boston,80000"""

employees = []

lines = csv_data.strip().split('\n')
headers = lines[0].split(',')
for line in lines[1:]:
    values = line.split(',')
    employee = dict(zip(headers, values))
    employee['age'] = int(employee['age'])
    employee['salary'] = int(employee['salary'])
    employees.append(employee)

# Analysis
print("Employee Analysis:")
print(f"Total employees: {len(employees)}")

avg_age = sum(emp['age'] for emp in employees) / len(employees)
avg_salary = sum(emp['salary'] for emp in employees) / len(employees)

print(f"Average age: {avg_age:.1f}")
print(f"Average salary: $" + f"{avg_salary:,.2f}")

# High earners
high_earners = [emp for emp in employees if emp['salary'] > 75000]
print(f"High earners (>$75k): {len(high_earners)}")
for emp in high_earners:
    print(f"  {emp['name']} - $" + f"{emp['salary']:,}")
"#,
    },
    Snippet {
        title: "Handling Errors",
        code: r#"# Errors are values you can catch
def safe_divide(a, b):
    try:
        return a / b
    except ZeroDivisionError as e:
        print(f"Cannot divide {a} by {b}: {e}")
        return None

print(safe_divide(10, 4))
print(safe_divide(1, 0))

try:
    int("forty-two")
except ValueError as e:
    print("ValueError:", e)
finally:
    print("done")
"#,
    },
];

/// Snippet at `index`, if any.
pub fn get(index: usize) -> Option<&'static Snippet> {
    SNIPPETS.get(index)
}

/// Snippet whose title matches `title`, ignoring case.
pub fn find(title: &str) -> Option<&'static Snippet> {
    SNIPPETS
        .iter()
        .find(|snippet| snippet.title.eq_ignore_ascii_case(title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{EvaluatorLimits, run_to_string};

    #[test]
    fn every_snippet_runs_on_builtin_interpreter() {
        for snippet in SNIPPETS {
            let result = run_to_string(snippet.code, EvaluatorLimits::default());
            assert!(result.is_ok(), "{}: {:?}", snippet.title, result.err());
        }
    }

    #[test]
    fn hello_snippet_output() {
        let output = run_to_string(SNIPPETS[0].code, EvaluatorLimits::default()).unwrap();
        assert_eq!(
            output,
            "Hello, Python World!\n\
             My name is Python Learner, I'm 25 years old\n\
             Am I learning Python? True\n\
             I like apples\n\
             I like bananas\n\
             I like cherrys\n"
        );
    }

    #[test]
    fn file_processing_snippet_output() {
        let snippet = find("file processing").unwrap();
        let output = run_to_string(snippet.code, EvaluatorLimits::default()).unwrap();
        assert_eq!(
            output,
            "Employee Analysis:\n\
             Total employees: 4\n\
             Average age: 29.5\n\
             Average salary: $77,500.00\n\
             High earners (>$75k): 2\n  \
             Bob - $85,000\n  \
             Diana - $80,000\n"
        );
    }

    #[test]
    fn error_snippet_catches_both_faults() {
        let output = run_to_string(find("Handling Errors").unwrap().code, EvaluatorLimits::default())
            .unwrap();
        assert_eq!(
            output,
            "2.5\n\
             Cannot divide 1 by 0: division by zero\n\
             None\n\
             ValueError: invalid literal for int() with base 10: 'forty-two'\n\
             done\n"
        );
    }
}
