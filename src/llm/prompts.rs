//! The bindingness evaluation prompt.
//!
//! One fixed template is used for every call site, cross-validation and
//! production alike. Rendering is plain interpolation; equal inputs give
//! byte-identical prompts.

use crate::policy::Policy;
use crate::retriever::RetrievedCase;
use std::fmt::Write;

/// Fixed text blocks of the judge conversation.
pub struct Prompts;

impl Prompts {
    /// System instruction sent with every judgment.
    pub fn system_instruction() -> &'static str {
        "You are a professional policy evaluation assistant. Your task is to assess the bindingness of policies and return the result strictly in JSON format."
    }

    /// Task framing, score categories, dimensions and procedure.
    fn evaluation_preamble() -> &'static str {
        r#"You are an expert legal-policy analyst evaluating the **bindingness** of climate or environmental policies. Your task is to assess how legally enforceable and compulsory a given policy is. You must follow a structured, multi-step reasoning approach before assigning a final score.

---

Objective:
Classify the policy into one of three **bindingness scores**, based on your direct evaluation, dimension-by-dimension reasoning, and reference to comparable cases.


---

### Scoring Categories:

- **Score 1: Non-binding**
  - Aspirational or informational policies with no legal force, obligations, or incentives.
  - Often appear as reports, plans, advisory boards, or descriptive indexes.
  - **Common keywords**: may, encourage, develop, planning goals

- **Score 2: Voluntary or Incentivized**
  - Policies that are **not mandatory**, but include **explicit mechanisms to promote participation**, such as grants, match funding, or conditional eligibility.
  - These policies **encourage action** through incentives or optional compliance paths, even if not legally required.
  - Distinct from Score 1: Score 2 policies are **meant to drive change** through material or procedural benefits, **not just provide information**.
  - **Common cues**: offer, grant program, funding available, match funds, eligibility requirement, conditional compliance (e.g., "where practicable")

- **Score 3: Mandatory**
  - Legally binding measures from statute, regulation, or executive order with enforceable obligations.
  - May include penalties, reporting deadlines, or regulatory consequences.
  - **Common keywords**: must, shall, is required to, mandate, penalty, enforce

> Note: Use judgment based on overall context, not just keywords.
---

### Evaluation Dimensions (Used for Explanation):

For each of the five dimensions, answer both components:

1. **Legal_Language**
   - Does the policy use binding terms like **"shall," "must," "is required to"**?
   - Or does it use non-binding terms like **"may," "encourage," "help," "support," "goal"**?

2. **Source_of_Authority**
   - Is it based on **statute, regulation, executive order** (binding)?
   - Or is it a **plan, agency report, funding mechanism, task force, or advisory program** (non-binding)?

3. **Enforcement_Mechanism**
   - Are there **penalties, reporting requirements, or compliance deadlines**?
   - Or is it **aspirational** with **no consequence** for failure to comply?

4. **Obligations**
   - Who is obligated to act?
   - Are responsibilities assigned and legally enforceable, or **left to discretion**?

5. **Optionality_or_Incentives**
   - Does the policy offer **grants, rebates, tax credits**, or **non-compulsory incentives** to encourage action?


### Step-by-step Procedure:

1. **Analyze the Current Policy**
   - Examine each of the five dimensions.
   - Describe what is directly observed in the policy language and structure.

2. **Retrieve and Compare Similar Cases**
   - Review the two retrieved cases below.
   - Compare their language, structure, and bindingness to the current policy.

3. **Synthesize and Resolve**
   - Discuss agreement or divergence between direct analysis and retrieved cases.
   - Highlight any ambiguous elements or borderline scores.

4. **Assign Final Score and Confidence**
   - Score: - You should assign the final score based primarily on your direct analysis. Retrieved cases serve as contextual benchmarks.
   - Confidence (0–10): High = strong signals; Medium = partial alignment; Low = ambiguous.

---

### Current Policy for Evaluation:

"#
    }

    /// Heading and guidance placed before the retrieved cases.
    fn reference_cases_intro() -> &'static str {
        r#"---

### Retrieved Reference Cases:

Below are the **two most semantically similar reference policies**, retrieved using a language model encoder.
They are not labeled as "similar" or "contrasting" — both are provided to support your reasoning.

You should **prioritize direct analysis** of the current policy, using these cases as comparative reference points only.



"#
    }

    /// The literal output template the judge must fill in.
    fn output_format() -> &'static str {
        r#"---



### Final Output Format (JSON Only):

{
  "Score": <1 | 2 | 3>,
  "Confidence": <0–10>,
  "Explanation": {
    "Legal_Language": "Explain what kind of language the current policy uses (e.g., 'shall', 'may', 'encourage').",
    "Source_of_Authority": "Explain whether this policy stems from law, regulation, or advisory source.",
    "Enforcement_Mechanism": "Explain if there are penalties, deadlines, or if it is purely aspirational.",
    "Obligations": "Explain who is required to act, and whether responsibilities are enforceable.",
    "Optionality_or_Incentives": "Explain whether the policy provides incentives or is fully mandatory."
  },
  "Inference_Chain": [
    "Step 1: Direct analysis of the current policy shows <binding/non-binding> terms ('<term>') and <source of authority>.",
    "Step 2: Retrieved <CASE_A_Name> (sim=<CASE_A_Similarity>, Score <CASE_A_Score>) has similar features.",
    "Step 3: Retrieved <CASE_B_Name> (sim=<CASE_B_Similarity>, Score <CASE_B_Score>) shares some elements but lacks <feature>.",
    "Step 4: Current policy aligns more with <CASE_A_Name> due to <reason>.",
    "Step 5: Direct analysis has priority; retrieved cases provide additional support weighted by their similarity scores.",
    "Step 6: Final judgment: Score <Final_Score>, Confidence <Confidence_Score>."
  ],
  "Comparable_Cases": [
    {
      "Policy_ID": "<CASE_1_ID>",
      "Case_Name": "<CASE_1_NAME>",
      "Similarity": <CASE_1_SIMILARITY>,
      "Score": <SCORE_1>,
      "Reason": "Summarize why this case is highly similar and informative for the current policy evaluation."
    },
    {
      "Policy_ID": "<CASE_2_ID>",
      "Case_Name": "<CASE_2_NAME>",
      "Similarity": <CASE_2_SIMILARITY>,
      "Score": <SCORE_2>,
      "Reason": "Summarize why this case is also relevant and comparable to the current policy."
    }
  ]
}

Note: The above is a structural JSON template.

You must:
- Replace <...> placeholders with actual values from your analysis.
- Derive both cases from the two retrieved examples.
- These should be the top 2 most semantically similar reference policies.
- Do not copy this template literally.

---

Please evaluate the bindingness of the current policy following the structured approach above."#
    }
}

/// Renders the evaluation prompt for one target policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, target: &Policy, cases: &[RetrievedCase]) -> String {
        let mut prompt = String::with_capacity(8 * 1024);
        prompt.push_str(Prompts::evaluation_preamble());

        // Writing to a String cannot fail.
        let _ = write!(
            prompt,
            "Policy ID: {}  \nPolicy Name: {}  \nType: {}  \nDescription:  \n{}\n\n",
            target.policy_id, target.policy_name, target.policy_type, target.description
        );

        prompt.push_str(Prompts::reference_cases_intro());

        for (i, case) in cases.iter().enumerate() {
            let p = &case.policy;
            let score = p.score.map(|s| s.to_string()).unwrap_or_default();
            let _ = write!(
                prompt,
                "\nCase {}:\nPolicy ID: {}\nName: {}\nSimilarity: {:.4}\nScore: {}\nType: {}\nDescription: {}\n\nExplanation: {}\n\n",
                i + 1,
                p.policy_id,
                p.policy_name,
                case.similarity,
                score,
                p.policy_type,
                p.description,
                p.explanation.as_deref().unwrap_or(""),
            );
        }

        prompt.push_str(Prompts::output_format());
        prompt
    }
}
