//! Fluechtiger In-Memory-Speicher
//!
//! Haelt Benutzer, Tokens, Chats und Nachrichten hinter einem einzigen
//! `parking_lot::Mutex`. Nach einem Neustart ist alles weg.

use nexus_core::{
    error::{NexusError, Result},
    types::{ChatId, MessageId, UserId},
};
use nexus_protocol::NachrichtInfo;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::MessengerStore;

// ---------------------------------------------------------------------------
// Interne Datensaetze
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BenutzerEintrag {
    anzeigename: String,
    zuletzt_gesehen: i64,
}

#[derive(Debug, Clone)]
struct NachrichtEintrag {
    id: MessageId,
    chat_id: ChatId,
    sender_id: UserId,
    inhalt: String,
    erstellt: i64,
    bearbeitet: Option<i64>,
    geloescht: bool,
    leser: HashSet<UserId>,
}

#[derive(Default)]
struct MemoryStoreInner {
    benutzer: HashMap<UserId, BenutzerEintrag>,
    tokens: HashMap<String, UserId>,
    /// Mitglieder in Beitrittsreihenfolge
    chats: HashMap<ChatId, Vec<UserId>>,
    nachrichten: BTreeMap<MessageId, NachrichtEintrag>,
    naechste_nachricht_id: i64,
}

impl MemoryStoreInner {
    fn info(&self, eintrag: &NachrichtEintrag) -> NachrichtInfo {
        let display_name = self
            .benutzer
            .get(&eintrag.sender_id)
            .map(|b| b.anzeigename.clone())
            .unwrap_or_default();
        let read_count = eintrag
            .leser
            .iter()
            .filter(|uid| **uid != eintrag.sender_id)
            .count() as u32;

        NachrichtInfo {
            id: eintrag.id,
            chat_id: eintrag.chat_id,
            sender_id: eintrag.sender_id,
            display_name,
            content: eintrag.inhalt.clone(),
            created_at: eintrag.erstellt,
            edited_at: eintrag.bearbeitet,
            read_count,
        }
    }

    /// Sucht eine nicht geloeschte Nachricht des Autors
    fn eigene_nachricht(
        &mut self,
        message_id: MessageId,
        sender: UserId,
    ) -> Result<&mut NachrichtEintrag> {
        let eintrag = self
            .nachrichten
            .get_mut(&message_id)
            .filter(|n| !n.geloescht)
            .ok_or_else(|| NexusError::NachrichtNichtGefunden(message_id.to_string()))?;

        if eintrag.sender_id != sender {
            return Err(NexusError::ZugriffVerweigert(format!(
                "{sender} ist nicht Autor von {message_id}"
            )));
        }
        Ok(eintrag)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-Memory-Implementierung von [`MessengerStore`]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    /// Erstellt einen leeren Speicher
    pub fn neu() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner {
                naechste_nachricht_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Legt einen Benutzer mit einem gueltigen Token an
    ///
    /// Ein bereits vorhandener Benutzer behaelt seine alten Tokens.
    pub fn benutzer_anlegen(&self, user_id: UserId, anzeigename: &str, token: &str) {
        let mut inner = self.inner.lock();
        inner
            .benutzer
            .entry(user_id)
            .and_modify(|b| b.anzeigename = anzeigename.to_string())
            .or_insert_with(|| BenutzerEintrag {
                anzeigename: anzeigename.to_string(),
                zuletzt_gesehen: 0,
            });
        inner.tokens.insert(token.to_string(), user_id);
    }

    /// Legt einen Chat mit den gegebenen Mitgliedern an (ersetzt einen vorhandenen)
    pub fn chat_anlegen(&self, chat_id: ChatId, mitglieder: impl IntoIterator<Item = UserId>) {
        let mut liste: Vec<UserId> = Vec::new();
        for uid in mitglieder {
            if !liste.contains(&uid) {
                liste.push(uid);
            }
        }
        self.inner.lock().chats.insert(chat_id, liste);
    }

    /// Letzter bekannter Aktivitaetszeitpunkt eines Benutzers
    pub fn zuletzt_gesehen(&self, user_id: UserId) -> Option<i64> {
        self.inner
            .lock()
            .benutzer
            .get(&user_id)
            .map(|b| b.zuletzt_gesehen)
    }

    /// Laedt eine nicht geloeschte Nachricht
    pub fn nachricht(&self, message_id: MessageId) -> Option<NachrichtInfo> {
        let inner = self.inner.lock();
        inner
            .nachrichten
            .get(&message_id)
            .filter(|n| !n.geloescht)
            .map(|n| inner.info(n))
    }

    pub fn benutzer_anzahl(&self) -> usize {
        self.inner.lock().benutzer.len()
    }

    pub fn chat_anzahl(&self) -> usize {
        self.inner.lock().chats.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::neu()
    }
}

fn jetzt() -> i64 {
    chrono::Utc::now().timestamp()
}

impl MessengerStore for MemoryStore {
    async fn identitaet_aufloesen(&self, token: &str) -> Result<Option<UserId>> {
        Ok(self.inner.lock().tokens.get(token).copied())
    }

    async fn mitglieder(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        self.inner
            .lock()
            .chats
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| NexusError::ChatNichtGefunden(chat_id.to_string()))
    }

    async fn ist_mitglied(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .chats
            .get(&chat_id)
            .is_some_and(|m| m.contains(&user_id)))
    }

    async fn kontakte(&self, user_id: UserId) -> Result<Vec<UserId>> {
        let inner = self.inner.lock();
        let mut kontakte: Vec<UserId> = inner
            .chats
            .values()
            .filter(|m| m.contains(&user_id))
            .flatten()
            .copied()
            .filter(|uid| *uid != user_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        kontakte.sort();
        Ok(kontakte)
    }

    async fn zuletzt_gesehen_setzen(&self, user_id: UserId, zeitpunkt: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        let benutzer = inner
            .benutzer
            .get_mut(&user_id)
            .ok_or_else(|| NexusError::BenutzerNichtGefunden(user_id.to_string()))?;
        benutzer.zuletzt_gesehen = zeitpunkt;
        Ok(())
    }

    async fn zuletzt_gesehen_auffrischen(&self, user_id: UserId) -> Result<()> {
        self.zuletzt_gesehen_setzen(user_id, jetzt()).await
    }

    async fn anzeigename(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self
            .inner
            .lock()
            .benutzer
            .get(&user_id)
            .map(|b| b.anzeigename.clone()))
    }

    async fn nachricht_speichern(
        &self,
        chat_id: ChatId,
        sender: UserId,
        inhalt: &str,
    ) -> Result<NachrichtInfo> {
        let mut inner = self.inner.lock();

        let mitglieder = inner
            .chats
            .get(&chat_id)
            .ok_or_else(|| NexusError::ChatNichtGefunden(chat_id.to_string()))?;
        if !mitglieder.contains(&sender) {
            return Err(NexusError::ZugriffVerweigert(format!(
                "{sender} ist kein Mitglied von {chat_id}"
            )));
        }

        let id = MessageId(inner.naechste_nachricht_id);
        inner.naechste_nachricht_id += 1;

        let eintrag = NachrichtEintrag {
            id,
            chat_id,
            sender_id: sender,
            inhalt: inhalt.to_string(),
            erstellt: jetzt(),
            bearbeitet: None,
            geloescht: false,
            leser: HashSet::from([sender]),
        };
        let info = inner.info(&eintrag);
        inner.nachrichten.insert(id, eintrag);
        Ok(info)
    }

    async fn nachricht_editieren(
        &self,
        message_id: MessageId,
        sender: UserId,
        inhalt: &str,
    ) -> Result<NachrichtInfo> {
        let mut inner = self.inner.lock();
        let eintrag = inner.eigene_nachricht(message_id, sender)?;
        eintrag.inhalt = inhalt.to_string();
        eintrag.bearbeitet = Some(jetzt());
        let eintrag = eintrag.clone();
        Ok(inner.info(&eintrag))
    }

    async fn nachricht_loeschen(&self, message_id: MessageId, sender: UserId) -> Result<ChatId> {
        let mut inner = self.inner.lock();
        let eintrag = inner.eigene_nachricht(message_id, sender)?;
        eintrag.geloescht = true;
        Ok(eintrag.chat_id)
    }

    async fn als_gelesen_markieren(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Vec<MessageId>> {
        let mut inner = self.inner.lock();
        if !inner.chats.contains_key(&chat_id) {
            return Err(NexusError::ChatNichtGefunden(chat_id.to_string()));
        }

        let mut markiert = Vec::new();
        for eintrag in inner.nachrichten.values_mut() {
            if eintrag.chat_id == chat_id
                && eintrag.sender_id != user_id
                && !eintrag.geloescht
                && eintrag.leser.insert(user_id)
            {
                markiert.push(eintrag.id);
            }
        }
        Ok(markiert)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);
    const CAROL: UserId = UserId(3);
    const CHAT: ChatId = ChatId(10);

    fn test_store() -> MemoryStore {
        let store = MemoryStore::neu();
        store.benutzer_anlegen(ALICE, "Alice", "tok-alice");
        store.benutzer_anlegen(BOB, "Bob", "tok-bob");
        store.benutzer_anlegen(CAROL, "Carol", "tok-carol");
        store.chat_anlegen(CHAT, [ALICE, BOB]);
        store.chat_anlegen(ChatId(11), [BOB, CAROL]);
        store
    }

    #[tokio::test]
    async fn token_aufloesen() {
        let store = test_store();
        assert_eq!(store.identitaet_aufloesen("tok-bob").await.unwrap(), Some(BOB));
        assert_eq!(store.identitaet_aufloesen("falsch").await.unwrap(), None);
    }

    #[tokio::test]
    async fn kontakte_ohne_sich_selbst_und_ohne_duplikate() {
        let store = test_store();
        store.chat_anlegen(ChatId(12), [ALICE, BOB, CAROL]);

        assert_eq!(store.kontakte(BOB).await.unwrap(), vec![ALICE, CAROL]);
        assert_eq!(store.kontakte(UserId(99)).await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn chat_mitglieder_ohne_duplikate() {
        let store = test_store();
        store.chat_anlegen(ChatId(20), [ALICE, ALICE, BOB]);
        assert_eq!(store.mitglieder(ChatId(20)).await.unwrap(), vec![ALICE, BOB]);
        assert!(matches!(
            store.mitglieder(ChatId(404)).await,
            Err(NexusError::ChatNichtGefunden(_))
        ));
    }

    #[tokio::test]
    async fn nachricht_speichern_vergibt_fortlaufende_ids() {
        let store = test_store();
        let a = store.nachricht_speichern(CHAT, ALICE, "eins").await.unwrap();
        let b = store.nachricht_speichern(CHAT, BOB, "zwei").await.unwrap();

        assert_eq!(a.id, MessageId(1));
        assert_eq!(b.id, MessageId(2));
        assert_eq!(a.display_name, "Alice");
        assert_eq!(a.read_count, 0);
        assert!(a.edited_at.is_none());
    }

    #[tokio::test]
    async fn nachricht_nur_fuer_mitglieder() {
        let store = test_store();
        let ergebnis = store.nachricht_speichern(CHAT, CAROL, "hallo").await;
        assert!(matches!(ergebnis, Err(NexusError::ZugriffVerweigert(_))));
    }

    #[tokio::test]
    async fn editieren_und_loeschen_nur_durch_autor() {
        let store = test_store();
        let n = store.nachricht_speichern(CHAT, ALICE, "original").await.unwrap();

        assert!(matches!(
            store.nachricht_editieren(n.id, BOB, "fremd").await,
            Err(NexusError::ZugriffVerweigert(_))
        ));
        assert!(matches!(
            store.nachricht_loeschen(n.id, BOB).await,
            Err(NexusError::ZugriffVerweigert(_))
        ));

        let editiert = store.nachricht_editieren(n.id, ALICE, "neu").await.unwrap();
        assert_eq!(editiert.content, "neu");
        assert!(editiert.edited_at.is_some());

        assert_eq!(store.nachricht_loeschen(n.id, ALICE).await.unwrap(), CHAT);
        assert!(store.nachricht(n.id).is_none());
        assert!(matches!(
            store.nachricht_loeschen(n.id, ALICE).await,
            Err(NexusError::NachrichtNichtGefunden(_))
        ));
    }

    #[tokio::test]
    async fn gelesen_markieren_nur_fremde_und_nur_einmal() {
        let store = test_store();
        let a1 = store.nachricht_speichern(CHAT, ALICE, "a1").await.unwrap();
        let _b1 = store.nachricht_speichern(CHAT, BOB, "b1").await.unwrap();
        let a2 = store.nachricht_speichern(CHAT, ALICE, "a2").await.unwrap();

        let ids = store.als_gelesen_markieren(CHAT, BOB).await.unwrap();
        assert_eq!(ids, vec![a1.id, a2.id]);

        // Zweiter Aufruf: nichts mehr ungelesen
        assert!(store.als_gelesen_markieren(CHAT, BOB).await.unwrap().is_empty());

        assert_eq!(store.nachricht(a1.id).unwrap().read_count, 1);
    }

    #[tokio::test]
    async fn geloeschte_nachrichten_werden_nicht_markiert() {
        let store = test_store();
        let a1 = store.nachricht_speichern(CHAT, ALICE, "weg").await.unwrap();
        store.nachricht_loeschen(a1.id, ALICE).await.unwrap();

        assert!(store.als_gelesen_markieren(CHAT, BOB).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zuletzt_gesehen() {
        let store = test_store();
        store.zuletzt_gesehen_setzen(ALICE, 1234).await.unwrap();
        assert_eq!(store.zuletzt_gesehen(ALICE), Some(1234));

        store.zuletzt_gesehen_auffrischen(ALICE).await.unwrap();
        assert!(store.zuletzt_gesehen(ALICE).unwrap() > 1234);

        assert!(matches!(
            store.zuletzt_gesehen_setzen(UserId(99), 1).await,
            Err(NexusError::BenutzerNichtGefunden(_))
        ));
    }
}
