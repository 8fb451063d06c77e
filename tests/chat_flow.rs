mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use common::{
    aspirin_llm, aspirin_pdf, freedonia_pdf, service_with, service_with_embedder, CallKind,
    SwitchableEmbedder, FALLBACK_ANSWER,
};
use docchat::fallback::APOLOGY;
use docchat::service::{DOCUMENT_MARKER, GENERAL_MARKER};
use docchat::{extract_pages, ChatError, Provenance, Role, UploadError};
use uuid::Uuid;

#[test]
fn extraction_reports_every_page() {
    let pages = extract_pages(&aspirin_pdf()).expect("pages");
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].number, 1);
    assert!(pages[0].text.contains("325mg"));
    assert!(pages[1].text.contains("garden club"));
}

#[test]
fn document_question_gets_grounded_answer() {
    let llm = aspirin_llm();
    let service = service_with(llm.clone());
    let session = Uuid::new_v4();
    let receipt = service
        .upload_document(&aspirin_pdf(), Some("aspirin.pdf"), session)
        .expect("upload");
    assert_eq!(receipt.suggested_name, "aspirinBot");
    assert_eq!(receipt.pages, 2);
    assert_eq!(receipt.chunks, 2);

    let reply = service
        .chat(session, "What is the aspirin dosage?")
        .expect("reply");
    assert_eq!(reply.provenance, Provenance::Document);
    assert!(reply.reply.starts_with(DOCUMENT_MARKER));
    assert!(reply.reply.contains("325mg"));
    assert!(reply.reply.contains("\n\nYou might also ask:\n💡 Is it safe to take daily?"));
    assert_eq!(llm.count(CallKind::Fallback), 0);

    assert_eq!(reply.history.len(), 2);
    assert_eq!(reply.history[0].role, Role::User);
    assert_eq!(reply.history[0].text, "What is the aspirin dosage?");
    assert_eq!(reply.history[1].text, reply.reply);
}

#[test]
fn unrelated_question_falls_back_to_general_knowledge() {
    let llm = aspirin_llm();
    let service = service_with(llm.clone());
    let session = Uuid::new_v4();
    service
        .upload_document(&aspirin_pdf(), Some("aspirin.pdf"), session)
        .expect("upload");

    let reply = service
        .chat(session, "Who painted the ceiling of the Sistine Chapel?")
        .expect("reply");
    assert_eq!(reply.provenance, Provenance::GeneralKnowledge);
    assert!(reply.reply.starts_with(GENERAL_MARKER));
    assert!(reply.reply.contains(FALLBACK_ANSWER));
    assert_eq!(llm.count(CallKind::Grounding), 1);
    assert_eq!(llm.count(CallKind::Fallback), 1);
}

#[test]
fn sessions_never_see_each_others_documents() {
    let llm = aspirin_llm();
    let service = service_with(llm.clone());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (aspirin, freedonia) = (aspirin_pdf(), freedonia_pdf());
    thread::scope(|scope| {
        let first = scope.spawn(|| service.upload_document(&aspirin, Some("aspirin.pdf"), a));
        let second = scope.spawn(|| service.upload_document(&freedonia, Some("freedonia.pdf"), b));
        first.join().expect("join a").expect("upload a");
        second.join().expect("join b").expect("upload b");
    });

    let reply = service
        .chat(b, "What is the aspirin dosage?")
        .expect("reply");
    assert_eq!(reply.provenance, Provenance::GeneralKnowledge);
    assert!(!reply.reply.contains("325mg"));
    let prompts = llm.grounding_prompts.lock().expect("lock");
    assert!(prompts.iter().all(|prompt| !prompt.contains("325mg")));
    drop(prompts);

    let own = service
        .chat(b, "What is the capital of Freedonia?")
        .expect("reply");
    assert_eq!(own.provenance, Provenance::Document);
    assert!(own.reply.contains("Sylvania"));
}

#[test]
fn same_file_in_two_sessions_gets_disjoint_chunks() {
    let service = service_with(aspirin_llm());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let pdf = aspirin_pdf();
    service.upload_document(&pdf, Some("aspirin.pdf"), a).expect("a");
    service.upload_document(&pdf, Some("aspirin.pdf"), b).expect("b");

    let hits_a = service.retrieve_context(a, "aspirin").expect("a hits");
    let hits_b = service.retrieve_context(b, "aspirin").expect("b hits");
    assert!(hits_a.iter().all(|hit| hit.chunk.session_id == a));
    assert!(hits_b.iter().all(|hit| hit.chunk.session_id == b));
    let ids_a: HashSet<Uuid> = hits_a.iter().map(|hit| hit.chunk.id).collect();
    let ids_b: HashSet<Uuid> = hits_b.iter().map(|hit| hit.chunk.id).collect();
    assert_eq!(ids_a.len(), 2);
    assert!(ids_a.is_disjoint(&ids_b));
}

#[test]
fn unknown_session_without_default_is_fallback_only() {
    let llm = aspirin_llm();
    let service = service_with(llm.clone());
    let session = Uuid::new_v4();

    let reply = service
        .chat(session, "What is the aspirin dosage?")
        .expect("reply");
    assert_eq!(reply.provenance, Provenance::GeneralKnowledge);
    assert!(reply.reply.starts_with(GENERAL_MARKER));
    assert_eq!(llm.count(CallKind::Grounding), 0);
    assert_eq!(service.health().sessions, 1);
    assert_eq!(service.sessions().history(session).len(), 2);
}

#[test]
fn default_document_serves_sessions_without_uploads() {
    let service = service_with(aspirin_llm());
    let receipt = service
        .load_default_document(&aspirin_pdf(), Some("aspirin.pdf"))
        .expect("default");
    assert_eq!(receipt.pages, 2);
    assert!(service.health().default_index);

    let reply = service
        .chat(Uuid::new_v4(), "What is the aspirin dosage?")
        .expect("reply");
    assert_eq!(reply.provenance, Provenance::Document);
    assert!(reply.reply.contains("325mg"));

    let uploader = Uuid::new_v4();
    service
        .upload_document(&freedonia_pdf(), None, uploader)
        .expect("upload");
    let own = service
        .chat(uploader, "What is the aspirin dosage?")
        .expect("reply");
    assert_eq!(own.provenance, Provenance::GeneralKnowledge);
}

#[test]
fn model_failures_are_masked() {
    let llm = aspirin_llm();
    let service = service_with(llm.clone());
    let session = Uuid::new_v4();
    service
        .upload_document(&aspirin_pdf(), Some("aspirin.pdf"), session)
        .expect("upload");

    llm.fail_grounding.store(true, Ordering::SeqCst);
    let routed = service
        .chat(session, "What is the aspirin dosage?")
        .expect("reply");
    assert_eq!(routed.provenance, Provenance::GeneralKnowledge);

    llm.fail_followup.store(true, Ordering::SeqCst);
    let generic = service.chat(session, "Tell me more").expect("reply");
    assert!(generic.reply.contains("You might also ask:"));
    assert!(generic.reply.contains("💡 "));

    llm.fail_fallback.store(true, Ordering::SeqCst);
    let apology = service.chat(session, "And then?").expect("reply");
    assert_eq!(apology.provenance, Provenance::Apology);
    assert_eq!(apology.reply, APOLOGY);
    assert_eq!(apology.history.len(), 6);
}

#[test]
fn empty_message_records_nothing() {
    let service = service_with(aspirin_llm());
    let session = Uuid::new_v4();
    assert_eq!(service.chat(session, "   "), Err(ChatError::EmptyMessage));
    assert!(service.sessions().history(session).is_empty());
}

#[test]
fn failed_upload_keeps_previous_index() {
    let service = service_with(aspirin_llm());
    let session = Uuid::new_v4();
    service
        .upload_document(&aspirin_pdf(), Some("aspirin.pdf"), session)
        .expect("upload");

    let err = service
        .upload_document(b"%PDF-1.5 truncated", Some("broken.pdf"), session)
        .expect_err("broken upload");
    assert!(matches!(err, UploadError::Extraction(_)));

    let blank = common::pdf_with_pages(&["   "]);
    let err = service
        .upload_document(&blank, Some("blank.pdf"), session)
        .expect_err("blank upload");
    assert!(matches!(err, UploadError::EmptyDocument));

    let reply = service
        .chat(session, "What is the aspirin dosage?")
        .expect("reply");
    assert_eq!(reply.provenance, Provenance::Document);
}

#[test]
fn question_answers_skip_follow_ups() {
    let llm = std::sync::Arc::new(common::ScriptedLlm::new().rule(
        "dosage",
        "325mg",
        "Do you mean the adult dosage of 325mg or the child dosage?",
    ));
    let service = service_with(llm.clone());
    let session = Uuid::new_v4();
    service
        .upload_document(&aspirin_pdf(), None, session)
        .expect("upload");
    let reply = service.chat(session, "What dosage?").expect("reply");
    assert_eq!(reply.provenance, Provenance::Document);
    assert!(!reply.reply.contains("You might also ask:"));
    assert_eq!(llm.count(CallKind::FollowUp), 0);
}

#[test]
fn concurrent_turns_in_one_session_are_serialized() {
    let service = service_with(aspirin_llm());
    let session = Uuid::new_v4();
    service
        .upload_document(&aspirin_pdf(), Some("aspirin.pdf"), session)
        .expect("upload");

    const TURNS: usize = 8;
    thread::scope(|scope| {
        for i in 0..TURNS {
            let service = &service;
            scope.spawn(move || {
                service
                    .chat(session, &format!("Question {i}: what is the aspirin dosage?"))
                    .expect("reply")
            });
        }
    });

    let history = service.sessions().history(session);
    assert_eq!(history.len(), 2 * TURNS);
    for pair in history.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
        assert!(pair[1].text.starts_with(DOCUMENT_MARKER));
    }
    let mut asked: Vec<&str> = history
        .iter()
        .filter(|turn| turn.role == Role::User)
        .map(|turn| turn.text.as_str())
        .collect();
    asked.sort_unstable();
    asked.dedup();
    assert_eq!(asked.len(), TURNS);
}

#[test]
fn embedding_failure_keeps_previous_index() {
    let embedder = Arc::new(SwitchableEmbedder::new());
    let service = service_with_embedder(aspirin_llm(), embedder.clone());
    let session = Uuid::new_v4();
    service
        .upload_document(&aspirin_pdf(), Some("aspirin.pdf"), session)
        .expect("upload");

    embedder.failing.store(true, Ordering::SeqCst);
    let err = service
        .upload_document(&freedonia_pdf(), Some("freedonia.pdf"), session)
        .expect_err("embedding outage");
    assert!(matches!(err, UploadError::Embedding(_)));
    embedder.failing.store(false, Ordering::SeqCst);

    let reply = service
        .chat(session, "What is the aspirin dosage?")
        .expect("reply");
    assert_eq!(reply.provenance, Provenance::Document);
    assert!(reply.reply.contains("325mg"));
}

#[test]
fn embedding_failure_leaves_fresh_session_without_index() {
    let embedder = Arc::new(SwitchableEmbedder::new());
    let service = service_with_embedder(aspirin_llm(), embedder.clone());
    let session = Uuid::new_v4();

    embedder.failing.store(true, Ordering::SeqCst);
    let err = service
        .upload_document(&aspirin_pdf(), Some("aspirin.pdf"), session)
        .expect_err("embedding outage");
    assert!(matches!(err, UploadError::Embedding(_)));
    embedder.failing.store(false, Ordering::SeqCst);

    assert!(service.sessions().index_for(session).is_none());
    let reply = service
        .chat(session, "What is the aspirin dosage?")
        .expect("reply");
    assert_eq!(reply.provenance, Provenance::GeneralKnowledge);
}
