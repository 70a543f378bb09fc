use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::dto::attempt_dto::AnswerInput;
use crate::error::{Error, Result};
use crate::models::quiz::QuestionWithChoices;

const NORMALIZED_SCALE: i64 = 20;

#[derive(Debug, Clone)]
pub struct GradedAnswer {
    pub question_id: Uuid,
    pub selected_choice_ids: Vec<Uuid>,
    pub is_correct: bool,
    pub points_earned: Decimal,
}

#[derive(Debug, Clone)]
pub struct GradedSubmission {
    pub score: Decimal,
    pub total_points: Decimal,
    pub answers: Vec<GradedAnswer>,
}

/// Grades one submission against the quiz's question set.
///
/// An answer is correct iff its selected choice-id set equals the question's
/// correct choice-id set exactly. Points are all-or-nothing; a partially
/// right multi-choice answer earns zero. `total_points` sums over every
/// question in the quiz, answered or not.
///
/// Rejects the whole submission, without grading anything, when a question
/// id does not belong to the quiz, a question is answered twice, or a choice
/// does not belong to its question.
pub fn grade_submission(
    questions: &[QuestionWithChoices],
    answers: &[AnswerInput],
) -> Result<GradedSubmission> {
    let by_id: HashMap<Uuid, &QuestionWithChoices> =
        questions.iter().map(|q| (q.question.id, q)).collect();

    let mut seen: HashSet<Uuid> = HashSet::new();
    for answer in answers {
        if !by_id.contains_key(&answer.question_id) {
            return Err(Error::BadRequest(format!(
                "Question {} does not belong to this quiz",
                answer.question_id
            )));
        }
        if !seen.insert(answer.question_id) {
            return Err(Error::BadRequest(format!(
                "Question {} answered more than once",
                answer.question_id
            )));
        }
    }

    let total_points: Decimal = questions.iter().map(|q| q.question.points).sum();

    let mut graded = Vec::with_capacity(answers.len());
    let mut score = Decimal::ZERO;

    for answer in answers {
        let question = by_id[&answer.question_id];
        let valid_ids: HashSet<Uuid> = question.choices.iter().map(|c| c.id).collect();
        for choice_id in &answer.selected_choice_ids {
            if !valid_ids.contains(choice_id) {
                return Err(Error::BadRequest(format!(
                    "Choice {} does not belong to question {}",
                    choice_id, answer.question_id
                )));
            }
        }

        let selected: HashSet<Uuid> = answer.selected_choice_ids.iter().copied().collect();
        let correct: HashSet<Uuid> = question.correct_choice_ids().into_iter().collect();
        let is_correct = selected == correct;
        let points_earned = if is_correct {
            question.question.points
        } else {
            Decimal::ZERO
        };
        score += points_earned;

        graded.push(GradedAnswer {
            question_id: answer.question_id,
            selected_choice_ids: answer.selected_choice_ids.clone(),
            is_correct,
            points_earned,
        });
    }

    Ok(GradedSubmission {
        score,
        total_points,
        answers: graded,
    })
}

/// An empty quiz (zero total points) can never be passed.
pub fn is_passed(score: Decimal, total_points: Decimal, passing_percentage: Decimal) -> bool {
    if total_points.is_zero() {
        return false;
    }
    percentage(score, total_points) >= passing_percentage
}

pub fn percentage(score: Decimal, total_points: Decimal) -> Decimal {
    if total_points.is_zero() {
        return Decimal::ZERO;
    }
    score / total_points * Decimal::new(100, 0)
}

/// Rescales a raw score to the fixed 0-20 display range.
pub fn normalized_score(score: Decimal, total_points: Decimal) -> Decimal {
    if total_points.is_zero() {
        return Decimal::ZERO;
    }
    (score / total_points * Decimal::new(NORMALIZED_SCALE, 0)).round_dp(2)
}

/// The passing threshold on the 0-20 scale. Independent of the raw point
/// total, which keeps it defined for zero-point quizzes.
pub fn normalized_passing_threshold(passing_percentage: Decimal) -> Decimal {
    (passing_percentage * Decimal::new(NORMALIZED_SCALE, 0) / Decimal::new(100, 0)).round_dp(2)
}
