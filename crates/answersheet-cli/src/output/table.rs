use answersheet_core::pipeline::{SubmissionResult, SubmissionStatus};

pub fn format(result: &SubmissionResult) -> String {
    let mut out = String::new();
    let status = match result.status {
        SubmissionStatus::Complete => "complete",
        SubmissionStatus::Partial => "partial",
    };
    out.push_str(&format!(
        "Submission: {} page(s), {} student(s), {}\n\n",
        result.pages,
        result.students.len(),
        status
    ));

    for student in &result.students {
        out.push_str(&format!(
            "=== {} ({}) ===\n\n",
            student.student_id, student.student_name
        ));
        out.push_str(&format!("  Pages:     {}\n", student.page_numbers.join(", ")));
        out.push_str(&format!(
            "  Questions: {}\n\n",
            student.question_answered.join(", ")
        ));

        let width = student
            .answers
            .iter()
            .map(|a| a.question_no.len())
            .max()
            .unwrap_or(2)
            .max(2);
        for answer in &student.answers {
            for (i, path) in answer.answerpath.iter().enumerate() {
                let label = if i == 0 { answer.question_no.as_str() } else { "" };
                out.push_str(&format!("  {:<width$}  {}\n", label, path, width = width));
            }
        }
        out.push('\n');
    }

    if !result.page_faults.is_empty() {
        out.push_str("Skipped pages:\n");
        for fault in &result.page_faults {
            out.push_str(&format!(
                "  page {} ({}): {}\n",
                fault.page_index + 1,
                fault.stage,
                fault.error
            ));
        }
        out.push('\n');
    }

    if !result.pairing_faults.is_empty() {
        out.push_str("Missing snippets:\n");
        for fault in &result.pairing_faults {
            let kind = if fault.continuation { " (continuation)" } else { "" };
            out.push_str(&format!(
                "  page {}, question {}{}: {}\n",
                fault.page_index + 1,
                fault.question_no,
                kind,
                fault.error
            ));
        }
        out.push('\n');
    }

    if !result.warnings.is_empty() {
        out.push_str("Warnings:\n");
        for warning in &result.warnings {
            out.push_str(&format!(
                "  page {}: {}\n",
                warning.page_index + 1,
                warning.message
            ));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "Usage: {} input / {} output tokens, ${}\n",
        result.usage.input_tokens, result.usage.output_tokens, result.usage.cost
    ));
    out
}
