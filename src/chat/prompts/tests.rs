use super::*;

#[test]
fn general_knowledge_template() {
    assert_eq!(
        general_knowledge_prompt("explain X"),
        "You are a helpful assistant. Answer the question using your general knowledge.\n\
         Be informative and helpful in your response.\n\nQuestion: explain X\nAnswer:"
    );
}

#[test]
fn context_aware_template() {
    let prompt = context_aware_prompt("What is Y?", "Y is a letter.\n\nIt follows X.");

    assert_eq!(
        prompt,
        "You are a helpful assistant. Answer the question using the provided context when available and relevant.\n\
         If the context doesn't contain the answer, use your general knowledge to provide a helpful response.\n\
         Always be helpful and informative, whether using context or general knowledge.\n\n\
         Question: What is Y?\nContext:\nY is a letter.\n\nIt follows X.\nAnswer:"
    );
}

#[test]
fn braces_in_question_are_kept() {
    let prompt = general_knowledge_prompt("what does {x} mean?");
    assert!(prompt.contains("Question: what does {x} mean?\n"));
}
